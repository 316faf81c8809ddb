//! TOML configuration file loading and default path resolution
//!
//! Services layer their own resolution (CLI → ENV → TOML → default) on top of
//! the raw [`TomlConfig`] loaded here. Every field is optional so a partial file
//! only overrides what it names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "stagelab";

/// Raw contents of `stagelab.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
    /// Base URL of the REST persistence service; absent means local SQLite
    pub persistence_url: Option<String>,
    pub storage_url: Option<String>,
    pub jobs_url: Option<String>,
    pub assist_url: Option<String>,
    pub api_key: Option<String>,
    pub upload_chunk_size: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub destination_ttl_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub legacy_filename_fallback: Option<bool>,
    pub logging: LoggingConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Default configuration file path for the platform
///
/// `~/.config/stagelab/stagelab.toml` on Linux, the platform config dir elsewhere.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("stagelab.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Default data directory (database lives here unless configured)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./stagelab_data"))
}

/// Load a TOML config file
///
/// A missing file yields the all-`None` default; a present but malformed file
/// is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_overrides_named_fields_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stagelab.toml");
        std::fs::write(
            &path,
            r#"
storage_url = "https://storage.example.org"
upload_chunk_size = 4

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.storage_url.as_deref(), Some("https://storage.example.org"));
        assert_eq!(config.upload_chunk_size, Some(4));
        assert_eq!(config.logging.level, "debug");
        assert!(config.jobs_url.is_none());
        assert!(config.port.is_none());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stagelab.toml");
        std::fs::write(&path, "upload_chunk_size = \"many\"").unwrap();

        let err = load_toml_config(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_config_path_ends_with_app_file() {
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("stagelab/stagelab.toml"));
        }
    }
}
