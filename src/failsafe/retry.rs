//! Retry logic with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

/// Computed delays never exceed this cap
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for a single upstream
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Base delay, doubled per attempt before jitter
    pub delay_base: Duration,
}

impl RetryPolicy {
    /// Create a retry policy
    #[must_use]
    pub fn new(max_retries: u32, delay_base: Duration) -> Self {
        Self {
            max_retries,
            delay_base,
        }
    }

    /// Backoff delay before retry `attempt` (0-indexed):
    /// `min(delay_base * 2^attempt * jitter, 30s)` with jitter uniform in
    /// [0.5, 1.5). The randomization spreads out concurrent callers so their
    /// retries don't land in lockstep.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.5..1.5);
        let exp = 2f64.powi(attempt.min(31) as i32);
        let millis = self.delay_base.as_millis() as f64 * exp * jitter;
        Duration::from_millis(millis as u64).min(MAX_RETRY_DELAY)
    }
}

/// Execute a future with retry logic
///
/// Runs `f` up to `max_retries + 1` times. Non-retryable errors and the last
/// error after exhaustion propagate unchanged, status and code intact. A
/// server-provided `Retry-After` overrides the computed backoff delay.
///
/// # Errors
///
/// Returns the last error from `f` once attempts are exhausted or the error
/// is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    debug!(operation, error = %e, "Error not retryable");
                    return Err(e);
                }

                if attempt >= policy.max_retries {
                    debug!(
                        operation,
                        attempts = attempt + 1,
                        "Retry attempts exhausted"
                    );
                    return Err(e);
                }

                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| policy.delay_for(attempt));
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
