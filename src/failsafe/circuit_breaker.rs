//! Circuit breaker implementation

use std::future::Future;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::{Error, Result};

/// Only one probe request may be in flight while half-open
const MAX_HALF_OPEN_PROBES: u32 = 1;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (failing fast)
    Open,
    /// Circuit is half-open (single probe allowed to test recovery)
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable breaker state; every read/mutation goes through one mutex
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    half_open_in_flight: u32,
}

/// Per-upstream circuit breaker
///
/// Guards whether an operation may execute at all. Failures past the
/// configured threshold open the circuit; after `reset_timeout` a single
/// probe is admitted, and its outcome either closes or reopens the circuit.
pub struct CircuitBreaker {
    /// Upstream service name
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for an upstream service
    #[must_use]
    pub fn new(service: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            service: service.to_string(),
            config: config.clone(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                next_attempt: None,
                half_open_in_flight: 0,
            }),
        }
    }

    /// Execute an operation through the breaker
    ///
    /// Fails fast with [`Error::CircuitOpen`] while the circuit is open and
    /// with [`Error::CircuitSaturated`] while a half-open probe is already in
    /// flight; in both cases the operation is never invoked. When a
    /// `request_timeout` is configured the operation races it, and a timeout
    /// counts as a failure.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error unchanged after recording it.
    pub async fn execute<F, Fut, T>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let probe = self.admit(operation)?;
        // Decrements even if this future is dropped mid-operation, so an
        // abandoned probe can never saturate the half-open slot
        let _probe_guard = probe.then(|| ProbeGuard { breaker: self });

        let result = match self.config.request_timeout {
            Some(budget) => match tokio::time::timeout(budget, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    elapsed: budget,
                }),
            },
            None => op().await,
        };

        self.settle(probe, result.is_ok());
        result
    }

    /// Admission check; returns whether this call holds the probe slot
    fn admit(&self, operation: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            match inner.next_attempt {
                Some(at) if now < at => {
                    warn!(
                        service = %self.service,
                        operation,
                        retry_in_ms = (at - now).as_millis() as u64,
                        "Circuit open, rejecting request"
                    );
                    return Err(Error::CircuitOpen {
                        operation: operation.to_string(),
                        retry_after: at - now,
                    });
                }
                _ => {
                    debug!(service = %self.service, "Reset timeout elapsed, transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 0;
                }
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= MAX_HALF_OPEN_PROBES {
                debug!(service = %self.service, operation, "Probe already in flight, rejecting");
                return Err(Error::CircuitSaturated {
                    operation: operation.to_string(),
                });
            }
            inner.half_open_in_flight += 1;
            return Ok(true);
        }

        Ok(false)
    }

    /// Record the outcome of an admitted operation
    fn settle(&self, probe: bool, succeeded: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if succeeded {
            if probe {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.last_failure = None;
                inner.next_attempt = None;
                info!(service = %self.service, "Circuit breaker closed after successful probe");
            } else {
                inner.success_count += 1;
                if let Some(last) = inner.last_failure {
                    if now.duration_since(last) > self.config.monitoring_period {
                        inner.failure_count = 0;
                    }
                }
            }
            return;
        }

        inner.failure_count += 1;
        inner.last_failure = Some(now);

        if probe || inner.failure_count >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.next_attempt = Some(now + self.config.reset_timeout);
            inner.half_open_in_flight = 0;
            warn!(
                service = %self.service,
                failures = inner.failure_count,
                reopened = probe,
                "Circuit breaker opened"
            );
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get a status snapshot for observability
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        let now = Instant::now();
        CircuitBreakerStatus {
            service: self.service.clone(),
            state: inner.state.to_string(),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_age_ms: inner
                .last_failure
                .map(|at| now.duration_since(at).as_millis() as u64),
        }
    }
}

/// Releases the half-open probe slot on every settle path
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.inner.lock();
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
    }
}

/// Circuit breaker status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    /// Upstream service name
    pub service: String,
    /// Current state ("closed", "open", "half-open")
    pub state: String,
    /// Failures in the current monitoring window
    pub failure_count: u32,
    /// Successes since the last full reset
    pub success_count: u32,
    /// Milliseconds since the last failure, if any
    pub last_failure_age_ms: Option<u64>,
}
