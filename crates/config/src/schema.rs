//! Config schema types (retention tunables, reaper queue, storage).

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutodeleteConfig {
    pub retention: RetentionTuning,
    pub reaper: ReaperConfig,
    pub storage: StorageConfig,
}

/// Per-channel retention tunables.
///
/// The defaults match the limits of the Discord API (100 messages per
/// history page, 50 per bulk delete in our batching).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionTuning {
    /// Minimum spacing between two reap passes on the same channel.
    pub min_delete_interval_ms: u64,
    /// Backlog loads closer together than this are skipped.
    pub backlog_debounce_ms: u64,
    /// Number of recent messages fetched by a backlog load.
    pub backlog_window: usize,
    /// A reap pass suggests a reload when the live-set held at least this
    /// fraction of `backlog_window` ...
    pub reload_live_fraction: f64,
    /// ... and it collected more than this fraction of `backlog_window`.
    pub reload_delete_fraction: f64,
    /// Messages posted within this window of the first expired message are
    /// collected in the same pass.
    pub coalesce_window_ms: u64,
    /// Maximum ids per bulk-delete request.
    pub bulk_delete_batch: usize,
    /// "Nothing to do" horizon reported by an idle channel.
    pub idle_horizon_secs: u64,
}

impl Default for RetentionTuning {
    fn default() -> Self {
        Self {
            min_delete_interval_ms: 5_000,
            backlog_debounce_ms: 30,
            backlog_window: 100,
            reload_live_fraction: 0.8,
            reload_delete_fraction: 0.25,
            coalesce_window_ms: 1_500,
            bulk_delete_batch: 50,
            idle_horizon_secs: 240 * 60 * 60,
        }
    }
}

impl RetentionTuning {
    #[must_use]
    pub fn min_delete_interval(&self) -> Duration {
        Duration::from_millis(self.min_delete_interval_ms)
    }

    #[must_use]
    pub fn backlog_debounce(&self) -> Duration {
        Duration::from_millis(self.backlog_debounce_ms)
    }

    #[must_use]
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    #[must_use]
    pub fn idle_horizon(&self) -> Duration {
        Duration::from_secs(self.idle_horizon_secs)
    }

    /// Live-set size at or above which a large reap hints at more backlog.
    #[must_use]
    pub fn reload_live_threshold(&self) -> f64 {
        self.backlog_window as f64 * self.reload_live_fraction
    }

    /// Collected count above which a reap hints at more backlog.
    #[must_use]
    pub fn reload_delete_threshold(&self) -> f64 {
        self.backlog_window as f64 * self.reload_delete_fraction
    }
}

/// Reap/backlog queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// First retry delay after a failed backlog load.
    pub backoff_initial_ms: u64,
    /// Ceiling for the doubling retry delay.
    pub backoff_max_ms: u64,
    /// How long the timer loop sleeps when nothing is queued.
    pub idle_poll_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 1_000,
            backoff_max_ms: 10 * 60 * 1_000,
            idle_poll_ms: 60_000,
        }
    }
}

impl ReaperConfig {
    #[must_use]
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Where persisted channel records live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the channel records file. Defaults to
    /// `<data_dir>/channels.json` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the channel records path, falling back to the platform data dir.
    #[must_use]
    pub fn resolved_channels_path(&self) -> PathBuf {
        if let Some(path) = &self.channels_path {
            return path.clone();
        }
        directories::ProjectDirs::from("", "", "autodelete")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("channels.json")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_discord_limits() {
        let tuning = RetentionTuning::default();
        assert_eq!(tuning.backlog_window, 100);
        assert_eq!(tuning.bulk_delete_batch, 50);
        assert_eq!(tuning.min_delete_interval(), Duration::from_secs(5));
        assert_eq!(tuning.backlog_debounce(), Duration::from_millis(30));
        assert_eq!(tuning.coalesce_window(), Duration::from_millis(1_500));
        assert!((tuning.reload_live_threshold() - 80.0).abs() < f64::EPSILON);
        assert!((tuning.reload_delete_threshold() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AutodeleteConfig = toml::from_str(
            r#"
            [retention]
            backlog_window = 200

            [reaper]
            backoff_max_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retention.backlog_window, 200);
        assert_eq!(cfg.retention.bulk_delete_batch, 50);
        assert_eq!(cfg.reaper.backoff_max(), Duration::from_secs(5));
        assert_eq!(cfg.reaper.backoff_initial(), Duration::from_secs(1));
        assert!(cfg.storage.channels_path.is_none());
    }

    #[test]
    fn explicit_channels_path_wins() {
        let storage = StorageConfig {
            channels_path: Some(PathBuf::from("/tmp/x.json")),
        };
        assert_eq!(
            storage.resolved_channels_path(),
            PathBuf::from("/tmp/x.json")
        );
    }
}
