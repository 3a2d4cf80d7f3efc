//! Configuration validation.
//!
//! Checks tunables for values that would make the retention loop misbehave
//! (zero windows, fractions outside `(0, 1]`, inverted backoff bounds).

use crate::schema::AutodeleteConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "retention.backlog_window"
    pub path: &'static str,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

/// Validate a parsed configuration.
#[must_use]
pub fn validate(config: &AutodeleteConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let retention = &config.retention;

    if retention.backlog_window == 0 {
        result.push(
            Severity::Error,
            "retention.backlog_window",
            "must be at least 1",
        );
    }
    if retention.bulk_delete_batch == 0 {
        result.push(
            Severity::Error,
            "retention.bulk_delete_batch",
            "must be at least 1",
        );
    } else if retention.bulk_delete_batch > 100 {
        result.push(
            Severity::Warning,
            "retention.bulk_delete_batch",
            "remote bulk delete accepts at most 100 ids per request",
        );
    }
    for (path, value) in [
        ("retention.reload_live_fraction", retention.reload_live_fraction),
        (
            "retention.reload_delete_fraction",
            retention.reload_delete_fraction,
        ),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            result.push(
                Severity::Error,
                path,
                format!("must be in (0, 1], got {value}"),
            );
        }
    }
    if retention.min_delete_interval_ms == 0 {
        result.push(
            Severity::Warning,
            "retention.min_delete_interval_ms",
            "zero disables per-channel reap spacing",
        );
    }

    let reaper = &config.reaper;
    if reaper.backoff_initial_ms == 0 {
        result.push(
            Severity::Error,
            "reaper.backoff_initial_ms",
            "must be at least 1",
        );
    }
    if reaper.backoff_max_ms < reaper.backoff_initial_ms {
        result.push(
            Severity::Error,
            "reaper.backoff_max_ms",
            "must not be smaller than reaper.backoff_initial_ms",
        );
    }
    if reaper.idle_poll_ms == 0 {
        result.push(Severity::Error, "reaper.idle_poll_ms", "must be at least 1");
    }

    result
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn defaults_are_valid() {
        let result = validate(&AutodeleteConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.5)]
    #[case(1.5)]
    #[case(f64::NAN)]
    fn bad_fraction_is_an_error(#[case] fraction: f64) {
        let mut cfg = AutodeleteConfig::default();
        cfg.retention.reload_delete_fraction = fraction;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(
            result.diagnostics[0].path,
            "retention.reload_delete_fraction"
        );
    }

    #[test]
    fn oversized_batch_is_a_warning() {
        let mut cfg = AutodeleteConfig::default();
        cfg.retention.bulk_delete_batch = 150;
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn inverted_backoff_bounds() {
        let mut cfg = AutodeleteConfig::default();
        cfg.reaper.backoff_initial_ms = 10_000;
        cfg.reaper.backoff_max_ms = 1_000;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].path, "reaper.backoff_max_ms");
    }

    #[test]
    fn zero_window_and_batch() {
        let mut cfg = AutodeleteConfig::default();
        cfg.retention.backlog_window = 0;
        cfg.retention.bulk_delete_batch = 0;
        assert_eq!(validate(&cfg).count(Severity::Error), 2);
    }
}
