//! Extraction watermark persistence.
//!
//! Stores the instant before which every modified order has already been
//! fetched, so the next run only asks the source for newer changes.
//!
//! # Storage
//!
//! A single JSON object `{"last_extraction": "2025-08-22T11:58:00Z"}`.
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash leaves either the old or the new value.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointData {
    #[serde(default)]
    last_extraction: Option<String>,
}

/// File-backed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored watermark.
    ///
    /// A missing file means "fetch everything". A file that cannot be read
    /// or parsed is logged and treated the same way.
    pub async fn read(&self) -> Option<DateTime<Utc>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Checkpoint file not found, fetching full history");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read checkpoint, fetching full history");
                return None;
            }
        };

        let data: CheckpointData = match serde_json::from_str(&contents) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt checkpoint, fetching full history");
                return None;
            }
        };

        let raw = data.last_extraction.filter(|s| !s.trim().is_empty())?;
        match parse_timestamp(&raw) {
            Some(ts) => {
                info!(path = %self.path.display(), last_extraction = %format_timestamp(ts), "Loaded checkpoint");
                Some(ts)
            }
            None => {
                warn!(path = %self.path.display(), value = %raw, "Unparseable checkpoint value, fetching full history");
                None
            }
        }
    }

    /// Persist a new watermark atomically.
    pub async fn write(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let data = CheckpointData {
            last_extraction: Some(format_timestamp(timestamp)),
        };
        let json = serde_json::to_string(&data)?;

        // Write atomically via temp file
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), last_extraction = ?data.last_extraction, "Wrote checkpoint");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Format a watermark as UTC with second precision and a `Z` suffix.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored watermark.
///
/// Accepts RFC 3339 with any offset, and offset-less values (read as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
