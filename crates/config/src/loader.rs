use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use courier_common::{Error, Result};

use crate::schema::CourierConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["courier.yaml", "courier.yml"];

/// Load config from the given YAML path.
pub fn load_config(path: &Path) -> Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::message(format!("failed to read {}: {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::message(format!("failed to parse {}: {e}", path.display())))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{yaml,yml}` (project-local)
/// 2. `~/.config/courier/courier.{yaml,yml}` (user-global)
///
/// Returns `CourierConfig::default()` if no config file is found.
pub fn discover_and_load() -> CourierConfig {
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
    CourierConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/courier/`).
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|d| d.join("courier"))
}

/// Serialize `config` to YAML and write it atomically to `path`.
pub fn save_config(config: &CourierConfig, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| Error::message(format!("serialize config: {e}")))?;
    courier_common::fsio::atomic_write(path, yaml.as_bytes())?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.yaml");

        let mut cfg = CourierConfig::default();
        cfg.server.port = 9191;
        cfg.server.proxy_api_key = Some("sk-local-test".into());
        save_config(&cfg, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server.port, 9191);
        assert_eq!(loaded.server.proxy_api_key.as_deref(), Some("sk-local-test"));
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load_config(Path::new("/nonexistent/courier.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn load_malformed_yaml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.yaml");
        std::fs::write(&path, "server: [not, a, map").unwrap();
        assert!(load_config(&path).is_err());
    }
}
