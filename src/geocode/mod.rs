//! Postcode to coordinate resolution.
//!
//! Lookups go to a bulk endpoint in fixed-size batches. A batch that fails
//! (after retries) resolves every postcode in it to `None`; other batches
//! are unaffected.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GeocodingConfig;
use crate::extract::parse_retry_after;
use crate::model::Coordinates;
use crate::utils::retry::{Classify, RetryClass, RetryPolicy, Sleeper, WaitReason};

/// Resolution result keyed by normalized postcode.
pub type Resolved = HashMap<String, Option<Coordinates>>;

/// Errors constructing a resolver or looking up one batch.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("geocoding request failed: {0}")]
    Transport(String),

    #[error("geocoding service returned HTTP {0}")]
    Status(u16),

    #[error("geocoding service rate limited the request")]
    RateLimited(Option<Duration>),

    #[error("unexpected geocoding response: {0}")]
    Response(String),
}

impl Classify for GeocodeError {
    fn retry_class(&self) -> RetryClass {
        match self {
            GeocodeError::Transport(_) => RetryClass::Retryable,
            GeocodeError::Status(status) if *status >= 500 => RetryClass::Retryable,
            GeocodeError::RateLimited(hint) => RetryClass::RateLimited(*hint),
            _ => RetryClass::Fatal,
        }
    }
}

/// Resolves postcodes to coordinates.
#[async_trait]
pub trait GeocodingResolver: Send + Sync {
    /// Resolve every postcode in `postcodes`.
    ///
    /// Input values are normalized first; the returned map is keyed by the
    /// normalized form and has an entry for every non-empty input.
    async fn resolve(&self, postcodes: &BTreeSet<String>) -> Resolved;
}

/// Canonical lookup form: trimmed, uppercased, runs of whitespace
/// (including non-breaking spaces) collapsed to one ASCII space.
///
/// Returns None for blank input.
pub fn normalize_postcode(raw: &str) -> Option<String> {
    let normalized = raw
        .split_whitespace()
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Round to 2 decimal places (about 1km).
pub fn round_coordinate(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    postcodes: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    status: u16,
    #[serde(default)]
    result: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    query: String,
    result: Option<BulkLocation>,
}

#[derive(Debug, Deserialize)]
struct BulkLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Bulk resolver for a postcodes.io-compatible service.
pub struct PostcodesIoResolver {
    client: Client,
    endpoint: String,
    batch_size: usize,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl PostcodesIoResolver {
    pub fn new(config: &GeocodingConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self, GeocodeError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            batch_size: config.batch_size.max(1),
            policy: config.retry_policy(),
            sleeper,
        })
    }

    async fn lookup_batch(&self, batch: &[String]) -> Result<Resolved, GeocodeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&BulkRequest { postcodes: batch })
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(GeocodeError::RateLimited(hint));
        }
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body: BulkResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Response(e.to_string()))?;
        if body.status != 200 {
            return Err(GeocodeError::Status(body.status));
        }

        let mut resolved: Resolved = batch.iter().map(|p| (p.clone(), None)).collect();
        for item in body.result {
            let coordinates = item.result.and_then(|loc| match (loc.latitude, loc.longitude) {
                (Some(lat), Some(lon)) => Some(Coordinates {
                    latitude: round_coordinate(lat),
                    longitude: round_coordinate(lon),
                }),
                _ => None,
            });
            let key = normalize_postcode(&item.query).unwrap_or(item.query);
            resolved.insert(key, coordinates);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl GeocodingResolver for PostcodesIoResolver {
    async fn resolve(&self, postcodes: &BTreeSet<String>) -> Resolved {
        let unique: Vec<String> = postcodes
            .iter()
            .filter_map(|p| normalize_postcode(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut resolved = Resolved::with_capacity(unique.len());
        if unique.is_empty() {
            return resolved;
        }

        info!(postcodes = unique.len(), "Requesting coordinates for unique postcodes");

        for (index, batch) in unique.chunks(self.batch_size).enumerate() {
            let result = self
                .policy
                .run(
                    self.sleeper.as_ref(),
                    || self.lookup_batch(batch),
                    |err: &GeocodeError, delay: Duration, _: WaitReason| {
                        warn!(batch = index, delay_ms = delay.as_millis() as u64, error = %err, "Geocoding batch failed, retrying");
                    },
                )
                .await;

            match result {
                Ok(batch_result) => {
                    debug!(batch = index, postcodes = batch.len(), "Resolved geocoding batch");
                    resolved.extend(batch_result);
                }
                Err(failure) => {
                    let error = failure.into_error();
                    warn!(batch = index, postcodes = batch.len(), error = %error, "Geocoding batch failed, leaving coordinates empty");
                    resolved.extend(batch.iter().map(|p| (p.clone(), None)));
                }
            }
        }

        let found = resolved.values().filter(|c| c.is_some()).count();
        info!(resolved = found, unresolved = resolved.len() - found, "Geocoding finished");
        resolved
    }
}

/// Resolver that never looks anything up.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledResolver;

#[async_trait]
impl GeocodingResolver for DisabledResolver {
    async fn resolve(&self, postcodes: &BTreeSet<String>) -> Resolved {
        postcodes
            .iter()
            .filter_map(|p| normalize_postcode(p))
            .map(|p| (p, None))
            .collect()
    }
}

/// In-memory resolver for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    known: HashMap<String, Coordinates>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, postcode: &str, latitude: f64, longitude: f64) -> Self {
        if let Some(key) = normalize_postcode(postcode) {
            self.known.insert(
                key,
                Coordinates {
                    latitude,
                    longitude,
                },
            );
        }
        self
    }
}

#[async_trait]
impl GeocodingResolver for StaticResolver {
    async fn resolve(&self, postcodes: &BTreeSet<String>) -> Resolved {
        postcodes
            .iter()
            .filter_map(|p| normalize_postcode(p))
            .map(|p| {
                let coordinates = self.known.get(&p).copied();
                (p, coordinates)
            })
            .collect()
    }
}
