//! Retry policy with exponential backoff and rate-limit hints.
//!
//! One policy object drives every retry loop in the pipeline: page fetches
//! against the source API and geocoding batches. Callers classify their
//! errors through [`Classify`]; the policy decides whether to wait and for
//! how long. Waiting goes through a [`Sleeper`] so schedules are observable
//! in tests.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use backon::ExponentialBuilder;

/// How a failed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient failure: retry on the exponential schedule.
    Retryable,
    /// Server asked us to slow down, optionally saying for how long.
    RateLimited(Option<Duration>),
    /// Retrying cannot help.
    Fatal,
}

/// Errors that know how the retry loop should treat them.
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

/// Why the loop is about to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Backoff,
    RateLimit,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Wait(Duration, WaitReason),
    GiveUp,
}

/// Per-operation retry bookkeeping.
///
/// Rate-limit waits and generic retries draw from separate budgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub retries: u32,
    pub rate_limit_waits: u32,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap for the exponential schedule.
    pub max_delay: Duration,
    /// Maximum number of retries after the initial attempt (0 = no retries).
    pub max_retries: u32,
    /// Maximum number of server-hinted waits per operation.
    pub max_rate_limit_waits: u32,
    /// Upper bound applied to any single server-hinted wait.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_pages()
    }
}

impl RetryPolicy {
    /// Policy for source API page requests.
    ///
    /// - Base delay: 2s, doubling (2, 4, 8, 16, 32)
    /// - Max retries: 5
    /// - Rate-limit waits: 10, each capped at 5 minutes
    pub fn for_pages() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
            max_rate_limit_waits: 10,
            max_rate_limit_wait: Duration::from_secs(300),
        }
    }

    /// Policy for geocoding batches.
    ///
    /// - Base delay: 1s
    /// - Max retries: 2
    pub fn for_geocoding() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: 2,
            max_rate_limit_waits: 3,
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }

    /// Disable retries entirely.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_rate_limit_waits: 0,
            ..Self::for_pages()
        }
    }

    /// Calculate the delay for a given retry number (0-indexed).
    ///
    /// delay = base * 2^retry, capped at max_delay.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << retry.min(20));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_ms)
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Decide the next step after a failure of the given class.
    ///
    /// Updates `state` to account for the wait it returns.
    pub fn next(&self, state: &mut RetryState, class: RetryClass) -> RetryDecision {
        match class {
            RetryClass::Fatal => RetryDecision::GiveUp,
            RetryClass::RateLimited(Some(hint))
                if state.rate_limit_waits < self.max_rate_limit_waits =>
            {
                state.rate_limit_waits += 1;
                RetryDecision::Wait(hint.min(self.max_rate_limit_wait), WaitReason::RateLimit)
            }
            RetryClass::RateLimited(_) | RetryClass::Retryable => {
                if !self.should_retry(state.retries) {
                    return RetryDecision::GiveUp;
                }
                let delay = self.delay_for_attempt(state.retries);
                state.retries += 1;
                RetryDecision::Wait(delay, WaitReason::Backoff)
            }
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `notify` is called before every wait with the error that caused it.
    pub async fn run<T, E, F, Fut, N>(
        &self,
        sleeper: &dyn Sleeper,
        mut op: F,
        mut notify: N,
    ) -> Result<T, RetryFailure<E>>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, Duration, WaitReason),
    {
        let mut state = RetryState::default();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let class = error.retry_class();
                    match self.next(&mut state, class) {
                        RetryDecision::Wait(delay, reason) => {
                            notify(&error, delay, reason);
                            sleeper.sleep(delay).await;
                        }
                        RetryDecision::GiveUp if class == RetryClass::Fatal => {
                            return Err(RetryFailure::Fatal(error));
                        }
                        RetryDecision::GiveUp => {
                            return Err(RetryFailure::Exhausted { error, state });
                        }
                    }
                }
            }
        }
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The error was not retryable.
    Fatal(E),
    /// Retries ran out; `error` is the last one observed.
    Exhausted { error: E, state: RetryState },
}

impl<E> RetryFailure<E> {
    pub fn into_error(self) -> E {
        match self {
            RetryFailure::Fatal(error) => error,
            RetryFailure::Exhausted { error, .. } => error,
        }
    }
}

/// Backoff for database connection retries at startup.
///
/// - Min delay: 500ms
/// - Max delay: 5s
/// - Max attempts: 10
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Requested durations in whole seconds.
    pub fn seconds(&self) -> Vec<u64> {
        self.calls().iter().map(Duration::as_secs).collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}
