//! Retry Policy
//!
//! Exponential backoff layered above resolution. The download scheduler never
//! retries on its own; callers opt in through
//! [`MediaManager::resolve_with_retry`](crate::manager::MediaManager::resolve_with_retry).

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

impl RetryConfig {
    /// Build the backoff schedule; attempts are bounded separately
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut schedule = config.backoff();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error: Error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %error, "Giving up after retries");
            return Err(error);
        }

        let Some(delay) = schedule.next_backoff() else {
            return Err(error);
        };
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after failure"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
