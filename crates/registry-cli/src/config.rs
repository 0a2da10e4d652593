//! Tool configuration loading from file and environment variables.

use std::collections::BTreeMap;

use registry_types::LEGAL_API_SERVICE;
use registry_versioning::StaticFlags;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Versioning flag settings.
    #[serde(default)]
    pub versioning: VersioningConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "registry_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Versioning configuration.
///
/// `flags` seeds the in-process flag source, keyed by flag name:
///
/// ```toml
/// [versioning.flags.db-versioning]
/// initialize-new-versioning = true
///
/// [versioning.flags.db-versioning.enable-new-versioning]
/// legal-api = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct VersioningConfig {
    /// Consumer service name used for the per-service switch.
    #[serde(default = "default_service")]
    pub service: String,

    /// Flag values by key.
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,
}

impl VersioningConfig {
    /// Builds a flag source holding the configured values.
    pub fn flag_source(&self) -> StaticFlags {
        StaticFlags::from_values(self.flags.clone())
    }
}

fn default_db_path() -> String {
    "registry.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service() -> String {
    LEGAL_API_SERVICE.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            flags: BTreeMap::new(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `REGISTRY_DB_PATH` overrides `database.path`
/// - `REGISTRY_LOG_LEVEL` overrides `logging.level`
/// - `REGISTRY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `REGISTRY_SERVICE_NAME` overrides `versioning.service`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = var("REGISTRY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("REGISTRY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("REGISTRY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(service) = var("REGISTRY_SERVICE_NAME") {
        if !service.trim().is_empty() {
            config.versioning.service = service;
        }
    }
}
