//! Run orchestration.
//!
//! One run: read the checkpoint, extract every endpoint, normalize, upsert,
//! then advance the checkpoint. A failing stage aborts the rest of the run;
//! reruns are the recovery mechanism.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::checkpoint::{format_timestamp, CheckpointStore, Clock};
use crate::config::{Config, ConfigError};
use crate::extract::{FetchError, PageFetcher, Termination};
use crate::geocode::{DisabledResolver, GeocodeError, GeocodingResolver, PostcodesIoResolver};
use crate::storage::{OrderSink, StorageError};
use crate::transform::Normalizer;
use crate::utils::retry::Sleeper;

/// Stage-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration failed: {0}")]
    Config(#[from] ConfigError),

    #[error("extraction failed: {0}")]
    Extract(#[from] FetchError),

    #[error("transformation failed: {0}")]
    Transform(#[from] GeocodeError),

    #[error("connecting to storage failed: {0}")]
    Connect(#[source] StorageError),

    #[error("loading failed: {0}")]
    Load(#[source] StorageError),
}

/// What happened to the checkpoint at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStatus {
    /// Persisted the new watermark.
    Advanced(DateTime<Utc>),
    /// Nothing new was observed.
    Unchanged,
    /// An endpoint stopped early and holding was configured; the window
    /// will be fetched again.
    Held,
    /// Persisting failed; the window will be fetched again.
    WriteFailed,
}

/// Per-endpoint extraction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReport {
    pub endpoint: String,
    pub records: usize,
    pub pages: u32,
    pub termination: Termination,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub since: Option<DateTime<Utc>>,
    pub endpoints: Vec<EndpointReport>,
    pub fetched: usize,
    pub normalized: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub upserted: usize,
    pub postcodes_resolved: usize,
    pub postcodes_unresolved: usize,
    pub checkpoint: CheckpointStatus,
}

impl RunReport {
    /// True when every endpoint paginated to an empty page.
    pub fn extraction_complete(&self) -> bool {
        self.endpoints.iter().all(|e| e.termination.is_complete())
    }
}

/// The ETL pipeline.
pub struct Pipeline {
    endpoints: Vec<String>,
    checkpoint: CheckpointStore,
    safety_margin: chrono::Duration,
    hold_on_incomplete: bool,
    fetcher: PageFetcher,
    normalizer: Normalizer,
    sink: Arc<dyn OrderSink>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Wire the pipeline from configuration.
    pub fn from_config(
        config: &Config,
        sink: Arc<dyn OrderSink>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let fetcher = PageFetcher::new(&config.source, sleeper.clone())?;
        let resolver: Arc<dyn GeocodingResolver> = if config.geocoding.enabled {
            Arc::new(PostcodesIoResolver::new(&config.geocoding, sleeper)?)
        } else {
            info!("Geocoding disabled");
            Arc::new(DisabledResolver)
        };

        Ok(Self {
            endpoints: config.source.endpoints.clone(),
            checkpoint: CheckpointStore::new(config.checkpoint.path.clone()),
            safety_margin: config.checkpoint.safety_margin(),
            hold_on_incomplete: config.checkpoint.hold_on_incomplete,
            fetcher,
            normalizer: Normalizer::new(resolver),
            sink,
            clock,
        })
    }

    /// Execute one full pass.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        info!("Starting data pipeline");

        let since = self.checkpoint.read().await;

        let mut raw = Vec::new();
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let outcome = self.fetcher.fetch(endpoint, since).await;
            if outcome.records.is_empty() {
                info!(endpoint = %endpoint, "No new data found");
            }
            endpoints.push(EndpointReport {
                endpoint: outcome.endpoint,
                records: outcome.records.len(),
                pages: outcome.pages,
                termination: outcome.termination,
            });
            raw.extend(outcome.records);
        }

        let fetched = raw.len();
        let observed_at = (fetched > 0).then(|| self.clock.now());
        let complete = endpoints.iter().all(|e| e.termination.is_complete());
        if !complete {
            warn!("Extraction stopped early on at least one endpoint, loading partial results");
        }

        let normalized = self.normalizer.normalize(raw).await;

        let summary = self.sink.upsert(&normalized.orders).await.map_err(|e| {
            error!(stage = "load", error = %e, "Loading failed, checkpoint left untouched");
            PipelineError::Load(e)
        })?;

        let checkpoint = match observed_at {
            None => CheckpointStatus::Unchanged,
            Some(_) if !complete && self.hold_on_incomplete => {
                warn!("Checkpoint held, the next run fetches the same window again");
                CheckpointStatus::Held
            }
            Some(now) => self.advance_checkpoint(now).await,
        };

        let report = RunReport {
            since,
            endpoints,
            fetched,
            normalized: normalized.orders.len(),
            dropped: normalized.dropped,
            duplicates: normalized.duplicates,
            upserted: summary.rows,
            postcodes_resolved: normalized.postcodes_resolved,
            postcodes_unresolved: normalized.postcodes_unresolved,
            checkpoint,
        };

        info!(
            fetched = report.fetched,
            normalized = report.normalized,
            dropped = report.dropped,
            upserted = report.upserted,
            postcodes_resolved = report.postcodes_resolved,
            postcodes_unresolved = report.postcodes_unresolved,
            checkpoint = ?report.checkpoint,
            "Pipeline finished"
        );
        Ok(report)
    }

    async fn advance_checkpoint(&self, now: DateTime<Utc>) -> CheckpointStatus {
        let watermark = now - self.safety_margin;
        match self.checkpoint.write(watermark).await {
            Ok(()) => {
                info!(last_extraction = %format_timestamp(watermark), "Extraction time updated");
                CheckpointStatus::Advanced(watermark)
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist checkpoint, next run will fetch the same window");
                CheckpointStatus::WriteFailed
            }
        }
    }
}
