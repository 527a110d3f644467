//! Bounded retries with exponential backoff.
//!
//! Used for one-shot requests such as event publishing. Streaming reconnects
//! are paced by the synchronizer's throttler instead.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{ErrorCode, Result, SyncError};

pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: 2
    pub max_attempts: u32,

    /// Delay before the second attempt. Default: 500ms
    pub base_delay: Duration,

    /// Upper bound for any single delay. Default: 10s
    pub max_delay: Duration,

    /// Random extra delay in `[0, jitter)`. Default: 100ms
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            jitter: DEFAULT_RETRY_JITTER,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped, plus jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential = self.base_delay.as_millis() as f64 * 2f64.powi((attempt - 1) as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);
        let jitter = rand::random::<f64>() * self.jitter.as_millis() as f64;

        Duration::from_millis((capped + jitter) as u64)
    }
}

#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter: Option<Duration>,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Transport failures that a later attempt may not hit.
pub fn is_retryable(error: &SyncError) -> bool {
    error.is_recoverable() && error.is_transport_error()
}

/// Outcome of a retried operation, with the number of attempts made.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with an error `should_retry` rejects,
/// or `config.max_attempts` is reached.
pub async fn with_retry_detailed<T, F, Fut, P>(operation: F, config: &RetryConfig, should_retry: P) -> RetryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&SyncError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = config.calculate_delay(attempt);
                tracing::debug!(
                    "Attempt {} of {} failed ({}), retrying in {:?}",
                    attempt,
                    max_attempts,
                    e.code,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return RetryResult {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}

/// Error used when a caller gives up after exhausting its attempts.
pub fn retry_limit_error(code: ErrorCode, attempts: u32, last: &SyncError) -> SyncError {
    SyncError::new(
        code,
        format!("Giving up after {} attempts: {}", attempts, last.message),
    )
}
