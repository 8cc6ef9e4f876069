//! Exponential backoff for rate-limited remote calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ParleyError;

/// Backoff policy applied only to rate-limit failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Upper bound on any single wait.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (zero-based).
    ///
    /// `base * 2^attempt` plus a jitter of `min(1s, 0.1s * attempt)`, capped at
    /// `backoff_max`. The jitter grows with the attempt so waits never shrink.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(62) as i32;
        let exponential = self.backoff_base.as_secs_f64() * 2f64.powi(exponent);
        let jitter = (0.1 * f64::from(attempt)).min(1.0);
        let capped = (exponential + jitter).min(self.backoff_max.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Run `operation`, retrying while it fails with a rate-limit signal.
    ///
    /// A server `retry-after` hint lengthens the wait up to `backoff_max` but
    /// never shortens it below the computed backoff. Any other failure, or
    /// running out of retries, is returned as-is.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, ParleyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ParleyError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limit() && attempt < self.max_retries => {
                    let backoff = self.delay_for(attempt);
                    let wait = e
                        .retry_after()
                        .map_or(backoff, |hint| hint.max(backoff).min(self.backoff_max));
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_secs = wait.as_secs_f64(),
                        hinted = e.retry_after().is_some(),
                        error = %e,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
