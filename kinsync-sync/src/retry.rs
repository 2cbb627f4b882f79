//! Generic exponential-backoff retry wrapper.
//!
//! Attempts an async operation up to a bounded number of times, sleeping
//! `base_delay * 2^(attempt-1)` between failures. Terminal errors (denied,
//! malformed, quota) short-circuit immediately rather than exhausting
//! attempts. Jitter is applied by default so that many devices recovering
//! from the same outage don't retry in lockstep.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry behavior for remote-store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after.
    pub base_delay: Duration,
    /// Randomize each delay to 50–150% of the computed value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with deterministic delays, for tests.
    #[must_use]
    pub fn without_jitter(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: false,
        }
    }

    /// The delay to sleep after a failed `attempt` (1-based).
    ///
    /// A server-requested rate-limit delay takes precedence when it
    /// exceeds the computed backoff.
    fn delay_after(&self, attempt: u32, error: &SyncError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1 << exponent);
        if let Some(requested) = error.retry_after() {
            delay = delay.max(requested);
        }
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            delay = delay.mul_f64(factor);
        }
        delay
    }
}

/// Runs `operation` under the given policy, returning the first success
/// or the last error once attempts are exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                if attempt >= policy.max_attempts.max(1) {
                    return Err(error);
                }
                let delay = policy.delay_after(attempt, &error);
                debug!(attempt, ?delay, %error, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
