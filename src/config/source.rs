//! Source API and geocoding service configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::utils::retry::RetryPolicy;

/// WooCommerce REST API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the REST API, e.g. `https://shop.example/wp-json/wc/v3`.
    pub base_url: String,
    /// API consumer key (basic-auth user).
    pub consumer_key: String,
    /// API consumer secret (basic-auth password).
    pub consumer_secret: String,
    /// Endpoints to extract, in order.
    pub endpoints: Vec<String>,
    /// Records requested per page.
    pub page_size: u32,
    /// Hard upper bound on pages fetched per endpoint.
    pub max_pages: u32,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Retries after the first failed attempt of a page.
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub backoff_base_secs: u64,
    /// Server-hinted waits allowed per page.
    pub max_rate_limit_waits: u32,
    /// Cap applied to a single server-hinted wait.
    pub max_rate_limit_wait_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            endpoints: vec!["orders".to_string()],
            page_size: 100,
            max_pages: 5000,
            request_timeout_secs: 60,
            max_retries: 5,
            backoff_base_secs: 2,
            max_rate_limit_waits: 10,
            max_rate_limit_wait_secs: 300,
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for page requests.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.backoff_base_secs),
            max_retries: self.max_retries,
            max_rate_limit_waits: self.max_rate_limit_waits,
            max_rate_limit_wait: Duration::from_secs(self.max_rate_limit_wait_secs),
            ..RetryPolicy::for_pages()
        }
    }
}

/// Bulk postcode lookup configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// When false, every order gets null coordinates and no requests are made.
    pub enabled: bool,
    /// Bulk lookup endpoint.
    pub endpoint: String,
    /// Postcodes per request.
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.postcodes.io/postcodes".to_string(),
            batch_size: 100,
            timeout_secs: 30,
            max_retries: 2,
            backoff_base_secs: 1,
        }
    }
}

impl GeocodingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for lookup batches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.backoff_base_secs),
            max_retries: self.max_retries,
            ..RetryPolicy::for_geocoding()
        }
    }
}
