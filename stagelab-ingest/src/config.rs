//! Configuration resolution for stagelab-ingest
//!
//! **Priority:** CLI → ENV → TOML → default
//!
//! clap covers the first two tiers (`#[arg(env = ...)]`); values it leaves
//! unset fall through to `stagelab.toml`, then to built-in defaults.

use clap::Parser;
use stagelab_common::config::{default_config_path, default_data_dir, TomlConfig};
use stagelab_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflow::{PipelineSettings, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 6;
pub const DEFAULT_DESTINATION_TTL_SECS: u64 = 600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Allowed upload wave sizes
pub const MIN_CHUNK_SIZE: usize = 3;
pub const MAX_CHUNK_SIZE: usize = 5;

/// Command-line arguments for stagelab-ingest
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "stagelab-ingest")]
#[command(about = "Batch image ingestion service for stagelab")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "STAGELAB_PORT")]
    pub port: Option<u16>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, env = "STAGELAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file, used when no persistence URL is set
    #[arg(long, env = "STAGELAB_DATABASE")]
    pub database: Option<PathBuf>,

    /// Remote persistence service base URL
    #[arg(long, env = "STAGELAB_PERSISTENCE_URL")]
    pub persistence_url: Option<String>,

    /// Object storage service base URL
    #[arg(long, env = "STAGELAB_STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Job dispatcher base URL
    #[arg(long, env = "STAGELAB_JOBS_URL")]
    pub jobs_url: Option<String>,

    /// Filename assist service base URL
    #[arg(long, env = "STAGELAB_ASSIST_URL")]
    pub assist_url: Option<String>,

    /// Bearer token sent to the collaborator services
    #[arg(long, env = "STAGELAB_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Concurrent uploads per wave (clamped to 3..=5)
    #[arg(long, env = "STAGELAB_UPLOAD_CHUNK_SIZE")]
    pub upload_chunk_size: Option<usize>,

    /// Seconds between reconciliation polls
    #[arg(long, env = "STAGELAB_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,
}

/// Where session, item, subject and log records live
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceBackend {
    Sqlite(PathBuf),
    Remote(String),
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub port: u16,
    pub persistence: PersistenceBackend,
    pub storage_url: String,
    pub jobs_url: String,
    pub assist_url: Option<String>,
    pub api_key: Option<String>,
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub destination_ttl: Duration,
    pub request_timeout: Duration,
    pub legacy_filename_fallback: bool,
    pub log_level: String,
}

/// Clamp a configured wave size into the allowed range; zero is rejected
pub fn clamp_chunk_size(requested: usize) -> Result<usize> {
    if requested == 0 {
        return Err(Error::Config("upload_chunk_size must be at least 1".to_string()));
    }
    let clamped = requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    if clamped != requested {
        tracing::warn!(requested, clamped, "upload_chunk_size outside 3..=5, clamped");
    }
    Ok(clamped)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(name: &str, env: &str, value: Option<String>) -> Result<String> {
    non_empty(value).ok_or_else(|| {
        Error::Config(format!(
            "{} not configured. Set --{} or {}, or `{}` in stagelab.toml",
            name,
            name.replace('_', "-"),
            env,
            name
        ))
    })
}

impl IngestConfig {
    /// Merge CLI/ENV arguments over the TOML file and defaults
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Result<Self> {
        let persistence = match non_empty(args.persistence_url.clone().or(toml.persistence_url.clone())) {
            Some(url) => PersistenceBackend::Remote(url),
            None => PersistenceBackend::Sqlite(
                args.database
                    .clone()
                    .or(toml.database_path.clone())
                    .unwrap_or_else(|| default_data_dir().join("stagelab.db")),
            ),
        };

        let chunk_size = clamp_chunk_size(
            args.upload_chunk_size
                .or(toml.upload_chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
        )?;

        let poll_interval_secs = args
            .poll_interval_secs
            .or(toml.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be at least 1".to_string()));
        }

        Ok(Self {
            port: args.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            persistence,
            storage_url: required(
                "storage_url",
                "STAGELAB_STORAGE_URL",
                args.storage_url.clone().or(toml.storage_url.clone()),
            )?,
            jobs_url: required(
                "jobs_url",
                "STAGELAB_JOBS_URL",
                args.jobs_url.clone().or(toml.jobs_url.clone()),
            )?,
            assist_url: non_empty(args.assist_url.clone().or(toml.assist_url.clone())),
            api_key: non_empty(args.api_key.clone().or(toml.api_key.clone())),
            chunk_size,
            poll_interval: Duration::from_secs(poll_interval_secs),
            destination_ttl: Duration::from_secs(
                toml.destination_ttl_secs.unwrap_or(DEFAULT_DESTINATION_TTL_SECS),
            ),
            request_timeout: Duration::from_secs(
                toml.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            legacy_filename_fallback: toml.legacy_filename_fallback.unwrap_or(true),
            log_level: toml.logging.level.clone(),
        })
    }

    /// Config file named on the command line, else the platform default
    pub fn config_path(args: &Args) -> Result<PathBuf> {
        match &args.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_size: self.chunk_size,
            poll_interval: self.poll_interval,
            legacy_filename_fallback: self.legacy_filename_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> TomlConfig {
        TomlConfig {
            storage_url: Some("http://storage.local".into()),
            jobs_url: Some("http://jobs.local".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        assert_eq!(clamp_chunk_size(1).unwrap(), 3);
        assert_eq!(clamp_chunk_size(4).unwrap(), 4);
        assert_eq!(clamp_chunk_size(12).unwrap(), 5);
        assert!(matches!(clamp_chunk_size(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_defaults_fill_unset_values() {
        let config = IngestConfig::resolve(&Args::default(), &minimal_toml()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.chunk_size, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(6));
        assert!(config.legacy_filename_fallback);
        assert!(matches!(config.persistence, PersistenceBackend::Sqlite(_)));
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml = TomlConfig {
            port: Some(6000),
            upload_chunk_size: Some(5),
            ..minimal_toml()
        };
        let args = Args {
            port: Some(7000),
            upload_chunk_size: Some(4),
            persistence_url: Some("https://db.example.org".into()),
            ..Default::default()
        };

        let config = IngestConfig::resolve(&args, &toml).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.chunk_size, 4);
        assert_eq!(
            config.persistence,
            PersistenceBackend::Remote("https://db.example.org".into())
        );
    }

    #[test]
    fn test_missing_storage_url_is_config_error() {
        let toml = TomlConfig {
            jobs_url: Some("http://jobs.local".into()),
            ..Default::default()
        };
        let err = IngestConfig::resolve(&Args::default(), &toml).unwrap_err();
        assert!(err.to_string().contains("storage_url"));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let toml = TomlConfig {
            poll_interval_secs: Some(0),
            ..minimal_toml()
        };
        assert!(IngestConfig::resolve(&Args::default(), &toml).is_err());
    }

    #[test]
    fn test_blank_assist_url_means_no_assist() {
        let toml = TomlConfig {
            assist_url: Some("  ".into()),
            ..minimal_toml()
        };
        let config = IngestConfig::resolve(&Args::default(), &toml).unwrap();
        assert!(config.assist_url.is_none());
    }
}
