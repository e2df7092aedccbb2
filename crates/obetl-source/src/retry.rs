//! Retry with exponential back-off and jitter.
//!
//! [`RetryPolicy`] is a plain value describing the schedule; callers pair it
//! with their own retryable-error predicate, so the fetcher and the pipeline
//! orchestrator share one mechanism with different error taxonomies.

use std::future::Future;
use std::time::Duration;

/// Maximum single back-off delay regardless of schedule.
const MAX_DELAY_MS: u64 = 60_000;

/// Back-off schedule: `backoff_base_ms * 2^(attempt - 1)` before the n-th
/// retry, ±25% jitter, capped at 60s. `max_retries` counts additional
/// attempts after the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
        }
    }

    /// A policy that never retries, for tests and one-shot probes.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let computed = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        let capped = computed.min(MAX_DELAY_MS);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
        Duration::from_millis(jittered)
    }
}

/// Runs `operation` under `policy`, retrying only errors for which
/// `is_retryable` returns `true`.
///
/// Non-retryable errors are returned immediately without sleeping. Once
/// `policy.max_retries` additional attempts are exhausted the last error is
/// returned.
///
/// # Errors
///
/// Returns the operation's error after retries are exhausted or immediately
/// for non-retryable errors.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient error — retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
