//! Failsafe mechanisms: circuit breaker, rate limiting, retry

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterStatus};
pub use retry::{MAX_RETRY_DELAY, RetryPolicy, with_retry};

use std::sync::Arc;

use crate::config::UpstreamConfig;

/// Combined failsafe wrapper for a single upstream service
///
/// One instance per upstream; breakers and limiters are never shared across
/// services, so a failing dependency cannot trip an unrelated circuit.
#[derive(Clone)]
pub struct Failsafe {
    /// Circuit breaker
    pub circuit_breaker: Arc<CircuitBreaker>,
    /// Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Retry policy
    pub retry_policy: RetryPolicy,
}

impl Failsafe {
    /// Create a new failsafe from an upstream's configuration
    #[must_use]
    pub fn new(service: &str, config: &UpstreamConfig) -> Self {
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::new(service, &config.circuit_breaker)),
            rate_limiter: Arc::new(RateLimiter::new(service, &config.rate_limit)),
            retry_policy: RetryPolicy::new(config.max_retries, config.retry_delay_base),
        }
    }
}
