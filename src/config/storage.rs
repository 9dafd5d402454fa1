//! Storage and checkpoint configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Database backend, selected from the connection URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Postgres,
    Sqlite,
}

impl StorageType {
    /// Detect the backend from a connection URL.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }
}

/// Destination database configuration.
///
/// Either `database_url` is set, or the URL is assembled from the
/// individual connection parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Full connection URL. Takes precedence over the individual parts.
    pub database_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    /// Schema holding the destination table (PostgreSQL only).
    pub schema: Option<String>,
    /// Destination table name.
    pub table: String,
    /// Rows written per transaction.
    pub batch_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            user: None,
            password: None,
            host: None,
            port: None,
            name: None,
            schema: None,
            table: "customer_orders".to_string(),
            batch_size: 200,
            connect_timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    /// Resolve the connection URL.
    ///
    /// Returns None when neither a URL nor host and database name are set.
    pub fn resolved_url(&self) -> Option<String> {
        if let Some(url) = self.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.to_string());
        }
        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        let name = self.name.as_deref().filter(|n| !n.is_empty())?;
        let credentials = match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (Some(user), None) => format!("{user}@"),
            _ => String::new(),
        };
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        Some(format!("postgres://{credentials}{host}{port}/{name}"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Checkpoint file configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Path of the JSON checkpoint file.
    pub path: PathBuf,
    /// Subtracted from the observed time before persisting.
    pub safety_margin_secs: u64,
    /// Keep the previous checkpoint when an endpoint stopped before its
    /// last page, so the next run fetches the same window again.
    pub hold_on_incomplete: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/other/last_extraction_time.json"),
            safety_margin_secs: 120,
            hold_on_incomplete: false,
        }
    }
}

impl CheckpointConfig {
    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs as i64)
    }
}
