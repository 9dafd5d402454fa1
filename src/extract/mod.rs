//! Paginated extraction from the WooCommerce REST API.
//!
//! Pages are requested strictly in order (`page=1, 2, ...`) until the server
//! returns an empty array. Each page is retried on its own budget: transient
//! failures follow the exponential schedule, 429 responses honor the
//! server's `Retry-After`. When a page cannot be fetched the endpoint stops
//! and everything accumulated so far is returned together with the reason.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::format_timestamp;
use crate::config::SourceConfig;
use crate::transform::RawOrder;
use crate::utils::retry::{
    Classify, RetryClass, RetryFailure, RetryPolicy, Sleeper, WaitReason,
};

/// Endpoint that also receives `status=any`.
const ORDERS_ENDPOINT: &str = "orders";

/// Errors constructing the fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid source configuration: {0}")]
    Config(String),
}

/// Why a single page request failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchFailure {
    /// Network error, timeout or 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// HTTP 429.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-retryable 4xx.
    #[error("request rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// Body was not a JSON array.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl Classify for FetchFailure {
    fn retry_class(&self) -> RetryClass {
        match self {
            FetchFailure::Transient(_) => RetryClass::Retryable,
            FetchFailure::RateLimited { retry_after } => RetryClass::RateLimited(*retry_after),
            FetchFailure::Rejected { .. } | FetchFailure::Malformed(_) => RetryClass::Fatal,
        }
    }
}

/// How an endpoint's pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// An empty page was returned.
    Exhausted,
    /// A page kept failing after every retry.
    RetriesExhausted { page: u32, retries: u32 },
    /// A page body could not be understood.
    MalformedPayload { page: u32 },
    /// The server refused the request.
    Rejected { page: u32, status: u16 },
    /// The page guard was reached before an empty page.
    PageLimit { max_pages: u32 },
}

impl Termination {
    /// True when every page of the endpoint was read.
    pub fn is_complete(&self) -> bool {
        matches!(self, Termination::Exhausted)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exhausted => write!(f, "exhausted"),
            Termination::RetriesExhausted { page, retries } => {
                write!(f, "retries exhausted on page {page} after {retries} retries")
            }
            Termination::MalformedPayload { page } => write!(f, "malformed payload on page {page}"),
            Termination::Rejected { page, status } => {
                write!(f, "rejected with HTTP {status} on page {page}")
            }
            Termination::PageLimit { max_pages } => write!(f, "page limit {max_pages} reached"),
        }
    }
}

/// Everything one endpoint produced.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub endpoint: String,
    pub records: Vec<RawOrder>,
    /// Non-empty pages received.
    pub pages: u32,
    pub termination: Termination,
}

/// Pages through a REST endpoint.
pub struct PageFetcher {
    client: Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    page_size: u32,
    max_pages: u32,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl PageFetcher {
    /// Create a fetcher from the source configuration.
    pub fn new(config: &SourceConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self, FetchError> {
        if config.base_url.trim().is_empty() {
            return Err(FetchError::Config("base URL not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            policy: config.retry_policy(),
            sleeper,
        })
    }

    /// Fetch every record of `endpoint` modified after `since`.
    ///
    /// Never fails once constructed: page-level problems end pagination and
    /// are reported through [`FetchOutcome::termination`].
    pub async fn fetch(&self, endpoint: &str, since: Option<DateTime<Utc>>) -> FetchOutcome {
        let url = format!("{}/{}", self.base_url, endpoint.trim_matches('/'));
        let base_query = self.base_query(endpoint, since);

        match since {
            Some(ts) => info!(endpoint = %endpoint, since = %format_timestamp(ts), "Fetching records modified since checkpoint"),
            None => info!(endpoint = %endpoint, "Fetching full history"),
        }

        let mut records = Vec::new();
        let mut pages = 0;
        let mut page = 1;

        let termination = loop {
            if page > self.max_pages {
                warn!(endpoint = %endpoint, max_pages = self.max_pages, "Page limit reached, stopping pagination");
                break Termination::PageLimit {
                    max_pages: self.max_pages,
                };
            }

            let result = self
                .policy
                .run(
                    self.sleeper.as_ref(),
                    || self.fetch_page(&url, &base_query, page),
                    |failure: &FetchFailure, delay: Duration, reason: WaitReason| match reason {
                        WaitReason::RateLimit => warn!(
                            endpoint = %endpoint,
                            page,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, waiting as requested by server"
                        ),
                        WaitReason::Backoff => warn!(
                            endpoint = %endpoint,
                            page,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure,
                            "Page request failed, retrying"
                        ),
                    },
                )
                .await;

            match result {
                Ok(items) if items.is_empty() => break Termination::Exhausted,
                Ok(items) => {
                    debug!(endpoint = %endpoint, page, records = items.len(), "Fetched page");
                    pages += 1;
                    records.extend(items.into_iter().map(RawOrder::new));
                    page += 1;
                }
                Err(RetryFailure::Exhausted { error, state }) => {
                    warn!(
                        endpoint = %endpoint,
                        page,
                        retries = state.retries,
                        error = %error,
                        "Max retries reached, keeping records fetched so far"
                    );
                    break Termination::RetriesExhausted {
                        page,
                        retries: state.retries,
                    };
                }
                Err(RetryFailure::Fatal(failure)) => {
                    warn!(endpoint = %endpoint, page, error = %failure, "Stopping pagination");
                    break match failure {
                        FetchFailure::Rejected { status } => Termination::Rejected { page, status },
                        FetchFailure::Malformed(_) => Termination::MalformedPayload { page },
                        FetchFailure::Transient(_) | FetchFailure::RateLimited { .. } => {
                            Termination::RetriesExhausted { page, retries: 0 }
                        }
                    };
                }
            }
        };

        info!(
            endpoint = %endpoint,
            records = records.len(),
            pages,
            termination = %termination,
            "Finished fetching endpoint"
        );

        FetchOutcome {
            endpoint: endpoint.to_string(),
            records,
            pages,
            termination,
        }
    }

    fn base_query(&self, endpoint: &str, since: Option<DateTime<Utc>>) -> Vec<(&'static str, String)> {
        let mut query = vec![("per_page", self.page_size.to_string())];
        if let Some(ts) = since {
            query.push(("modified_after", format_timestamp(ts)));
        }
        if endpoint == ORDERS_ENDPOINT {
            query.push(("status", "any".to_string()));
        }
        query
    }

    async fn fetch_page(
        &self,
        url: &str,
        base_query: &[(&'static str, String)],
        page: u32,
    ) -> Result<Vec<Value>, FetchFailure> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .query(base_query)
            .query(&[("page", page)])
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), Utc::now()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Err(FetchFailure::Malformed(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(FetchFailure::Malformed(e.to_string())),
        }
    }
}

/// Map a non-success status to a failure kind.
fn classify_status(status: StatusCode, headers: &HeaderMap, now: DateTime<Utc>) -> FetchFailure {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, now));
        return FetchFailure::RateLimited { retry_after };
    }
    if status.is_client_error() {
        return FetchFailure::Rejected {
            status: status.as_u16(),
        };
    }
    FetchFailure::Transient(format!("HTTP {status}"))
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
