use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::AutodeleteConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "autodelete.toml",
    "autodelete.yaml",
    "autodelete.yml",
    "autodelete.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<AutodeleteConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./autodelete.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/autodelete/autodelete.{toml,yaml,yml,json}` (user-global)
///
/// Returns `AutodeleteConfig::default()` if no config file is found or the
/// file fails to parse.
pub fn discover_and_load() -> AutodeleteConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    AutodeleteConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/autodelete/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "autodelete").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autodelete.toml")
}

/// Serialize `config` to TOML and write it to `path`.
///
/// Creates parent directories if needed.
pub fn save_config(config: &AutodeleteConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<AutodeleteConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, tempfile::TempDir};

    #[rstest]
    #[case("autodelete.toml", "[retention]\nbacklog_window = 42\n")]
    #[case("autodelete.yaml", "retention:\n  backlog_window: 42\n")]
    #[case("autodelete.json", r#"{"retention": {"backlog_window": 42}}"#)]
    fn load_each_format(#[case] name: &str, #[case] body: &str) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(name);
        std::fs::write(&path, body).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.retention.backlog_window, 42);
        assert_eq!(cfg.retention.bulk_delete_batch, 50);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("autodelete.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/autodelete.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/autodelete.toml"));
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("autodelete.toml");
        let mut cfg = AutodeleteConfig::default();
        cfg.reaper.idle_poll_ms = 1234;
        save_config(&cfg, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, cfg);
    }
}
