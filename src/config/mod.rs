//! Application configuration.
//!
//! Aggregates configuration from all components into a single Config struct,
//! built once at startup from an optional YAML file and environment variables,
//! then passed by reference into each component.

mod source;
mod storage;

pub use source::{GeocodingConfig, SourceConfig};
pub use storage::{CheckpointConfig, StorageConfig, StorageType};

use std::collections::HashMap;

use serde::Deserialize;

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORDER_ETL_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ORDER_ETL";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ORDER_ETL_LOG";

/// Legacy variable names, mapped onto config keys.
///
/// Earlier entries for the same key win.
const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("WOOCOMMERCE_CONSUMER_KEY", "source.consumer_key"),
    ("CONSUMER_KEY", "source.consumer_key"),
    ("WOOCOMMERCE_CONSUMER_SECRET", "source.consumer_secret"),
    ("CONSUMER_SECRET", "source.consumer_secret"),
    ("DATABASE_URL", "storage.database_url"),
    ("DB_USER", "storage.user"),
    ("DB_PASS", "storage.password"),
    ("DB_HOST", "storage.host"),
    ("DB_PORT", "storage.port"),
    ("DB_NAME", "storage.name"),
    ("DB_SCHEMA", "storage.schema"),
    ("DB_TABLE", "storage.table"),
];

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source REST API.
    pub source: SourceConfig,
    /// Postcode geocoding service.
    pub geocoding: GeocodingConfig,
    /// Destination database.
    pub storage: StorageConfig,
    /// Extraction watermark file.
    pub checkpoint: CheckpointConfig,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 2. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 3. Legacy variable names (`DB_HOST`, `CONSUMER_KEY`, ...) when present
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::vars().collect())
    }

    /// Load configuration from an explicit variable map.
    pub fn load_from(env: HashMap<String, String>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder();

        if let Some(config_path) = env.get(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("source.endpoints")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        // Legacy env vars for backwards compatibility
        for (var, key) in LEGACY_ENV_VARS.iter().rev() {
            let value = env.get(*var).filter(|v| !v.is_empty()).cloned();
            builder = builder.set_override_option(*key, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("source.base_url"));
        }
        if self.source.consumer_key.is_empty() {
            return Err(ConfigError::Missing("source.consumer_key"));
        }
        if self.source.consumer_secret.is_empty() {
            return Err(ConfigError::Missing("source.consumer_secret"));
        }
        if self.source.endpoints.is_empty() {
            return Err(ConfigError::Missing("source.endpoints"));
        }
        if self.source.page_size == 0 {
            return Err(invalid("source.page_size", "must be greater than zero"));
        }
        if self.source.max_pages == 0 {
            return Err(invalid("source.max_pages", "must be greater than zero"));
        }
        if self.geocoding.enabled && self.geocoding.batch_size == 0 {
            return Err(invalid("geocoding.batch_size", "must be greater than zero"));
        }
        if self.storage.batch_size == 0 {
            return Err(invalid("storage.batch_size", "must be greater than zero"));
        }
        if self.storage.table.trim().is_empty() {
            return Err(ConfigError::Missing("storage.table"));
        }
        let url = self
            .storage
            .resolved_url()
            .ok_or(ConfigError::Missing("storage.database_url"))?;
        if StorageType::from_url(&url).is_none() {
            return Err(invalid(
                "storage.database_url",
                "expected a postgres:// or sqlite: URL",
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test(base_url: &str, database_url: &str) -> Self {
        let mut config = Self::default();
        config.source.base_url = base_url.to_string();
        config.source.consumer_key = "ck_test".to_string();
        config.source.consumer_secret = "cs_test".to_string();
        config.storage.database_url = Some(database_url.to_string());
        config
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
