//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TRIPMESH_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file is not fatal: a warning is logged and
//! the remaining tiers are used.

use crate::geo::{DEFAULT_GEOHASH_PRECISION, MAX_GEOHASH_PRECISION};
use crate::time::DEFAULT_BUCKET_MINUTES;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

pub const ENV_CONFIG: &str = "TRIPMESH_CONFIG";
pub const ENV_DATABASE: &str = "TRIPMESH_DATABASE";
pub const ENV_BIND: &str = "TRIPMESH_BIND";
pub const ENV_UPLOAD_DIR: &str = "TRIPMESH_UPLOAD_DIR";
pub const ENV_CHUNK_SIZE: &str = "TRIPMESH_CHUNK_SIZE";
pub const ENV_GEOHASH_PRECISION: &str = "TRIPMESH_GEOHASH_PRECISION";
pub const ENV_TIME_BUCKET_MINUTES: &str = "TRIPMESH_TIME_BUCKET_MINUTES";
pub const ENV_LOG_LEVEL: &str = "TRIPMESH_LOG_LEVEL";

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_BIND: &str = "127.0.0.1:5780";

/// On-disk TOML configuration. All fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub ingestion: IngestionSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSection {
    pub chunk_size: Option<usize>,
    pub geohash_precision: Option<usize>,
    pub time_bucket_minutes: Option<u32>,
    pub max_conflict_retries: Option<u32>,
    pub max_lock_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    /// Where uploaded CSV files are stored before ingestion
    pub upload_dir: Option<PathBuf>,
    /// Per-subscriber notification buffer
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tunables of the clustering and ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Rows per batch (unit of atomicity and of progress granularity)
    pub chunk_size: usize,
    pub geohash_precision: usize,
    pub time_bucket_minutes: u32,
    /// Re-lookups allowed after a uniqueness conflict on group creation
    pub max_conflict_retries: u32,
    /// Total backoff budget for a batch hitting SQLite lock contention
    pub max_lock_wait_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            geohash_precision: DEFAULT_GEOHASH_PRECISION,
            time_bucket_minutes: DEFAULT_BUCKET_MINUTES,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

impl IngestSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".to_string()));
        }
        if self.geohash_precision == 0 || self.geohash_precision > MAX_GEOHASH_PRECISION {
            return Err(Error::Config(format!(
                "geohash_precision must be between 1 and {}, got {}",
                MAX_GEOHASH_PRECISION, self.geohash_precision
            )));
        }
        if self.time_bucket_minutes == 0 {
            return Err(Error::Config(
                "time_bucket_minutes must be at least 1".to_string(),
            ));
        }
        if self.max_conflict_retries == 0 {
            return Err(Error::Config(
                "max_conflict_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Command-line supplied values (highest priority tier)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub bind: Option<String>,
    pub upload_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub bind: String,
    pub upload_dir: PathBuf,
    pub event_capacity: usize,
    pub log_level: String,
    pub ingest: IngestSettings,
}

impl ServiceConfig {
    /// Resolve configuration from CLI, environment, TOML file and defaults
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let toml_path = cli
            .config_path
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let toml_config = match toml_path {
            Some(path) => load_toml_config(&path),
            None => TomlConfig::default(),
        };

        Self::resolve_with(cli, &toml_config)
    }

    /// Resolve against an already loaded TOML config
    pub fn resolve_with(cli: &CliOverrides, toml_config: &TomlConfig) -> Result<Self> {
        let database_path = cli
            .database
            .clone()
            .or_else(|| std::env::var(ENV_DATABASE).ok().map(PathBuf::from))
            .or_else(|| toml_config.database.path.clone())
            .unwrap_or_else(default_database_path);

        let bind = cli
            .bind
            .clone()
            .or_else(|| std::env::var(ENV_BIND).ok())
            .or_else(|| toml_config.server.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let upload_dir = cli
            .upload_dir
            .clone()
            .or_else(|| std::env::var(ENV_UPLOAD_DIR).ok().map(PathBuf::from))
            .or_else(|| toml_config.server.upload_dir.clone())
            .unwrap_or_else(default_upload_dir);

        let log_level = std::env::var(ENV_LOG_LEVEL)
            .ok()
            .unwrap_or_else(|| toml_config.logging.level.clone());

        let defaults = IngestSettings::default();
        let section = &toml_config.ingestion;
        let ingest = IngestSettings {
            chunk_size: match cli.chunk_size {
                Some(size) => size,
                None => env_parsed(ENV_CHUNK_SIZE)?
                    .or(section.chunk_size)
                    .unwrap_or(defaults.chunk_size),
            },
            geohash_precision: env_parsed(ENV_GEOHASH_PRECISION)?
                .or(section.geohash_precision)
                .unwrap_or(defaults.geohash_precision),
            time_bucket_minutes: env_parsed(ENV_TIME_BUCKET_MINUTES)?
                .or(section.time_bucket_minutes)
                .unwrap_or(defaults.time_bucket_minutes),
            max_conflict_retries: section
                .max_conflict_retries
                .unwrap_or(defaults.max_conflict_retries),
            max_lock_wait_ms: section
                .max_lock_wait_ms
                .unwrap_or(defaults.max_lock_wait_ms),
        };
        ingest.validate()?;

        let event_capacity = toml_config
            .server
            .event_capacity
            .unwrap_or(DEFAULT_EVENT_CAPACITY)
            .max(1);

        Ok(Self {
            database_path,
            bind,
            upload_dir,
            event_capacity,
            log_level,
            ingest,
        })
    }
}

/// Parse an environment variable, treating "unset" as `None` and a
/// malformed value as a configuration error.
fn env_parsed<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Load a TOML config file, falling back to defaults when it is missing or
/// malformed.
pub fn load_toml_config(path: &Path) -> TomlConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if path.exists() {
                warn!("Could not read config file {}: {}", path.display(), e);
            } else {
                info!("No config file at {}, using defaults", path.display());
            }
            return TomlConfig::default();
        }
    };

    match toml::from_str::<TomlConfig>(&content) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Ignoring malformed config file {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// `~/.config/tripmesh/config.toml` (platform equivalent elsewhere)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tripmesh").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tripmesh"))
        .unwrap_or_else(|| PathBuf::from("./tripmesh_data"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("tripmesh.db")
}

/// OS-dependent default directory for uploaded CSV files
pub fn default_upload_dir() -> PathBuf {
    default_data_dir().join("uploads")
}
