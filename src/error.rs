//! Error types for the upstream failsafe layer

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the upstream failsafe layer
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the resilient upstream client and its guards
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded before the request was admitted
    #[error("Rate limit exceeded for {service} ({scope} window), retry in {retry_after:?}")]
    RateLimited {
        /// Upstream service name
        service: String,
        /// Which window rejected the request ("minute" or "hour")
        scope: &'static str,
        /// Time until the rejecting window resets
        retry_after: Duration,
    },

    /// Circuit breaker is open; the operation was never invoked
    #[error("Circuit open for {operation}, retry in {retry_after:?}")]
    CircuitOpen {
        /// Operation that was rejected
        operation: String,
        /// Time until the next probe is admitted
        retry_after: Duration,
    },

    /// Circuit breaker is half-open with its probe slot taken
    #[error("Circuit half-open for {operation}, probe already in flight")]
    CircuitSaturated {
        /// Operation that was rejected
        operation: String,
    },

    /// Upstream transport failure with its original identity preserved
    #[error("Transport error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        /// HTTP status code, absent for network-level failures
        status: Option<u16>,
        /// Short machine-readable code (e.g. "connect", "dns")
        code: Option<String>,
        /// Human-readable message
        message: String,
        /// Server-provided Retry-After, when present on a 429/503
        retry_after: Option<Duration>,
    },

    /// Operation exceeded its time budget
    #[error("Timeout after {elapsed:?} in {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured budget that was exceeded
        elapsed: Duration,
    },

    /// Queued session was cancelled before it started
    #[error("Session {session} cancelled while queued")]
    Cancelled {
        /// Session identifier
        session: String,
    },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry executor may transparently re-attempt after this error.
    ///
    /// Network-level failures, timeouts, 5xx responses, and 429 are retryable;
    /// any other 4xx is terminal. Admission and breaker rejections are never
    /// retried by this layer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport { status, .. } => match status {
                Some(code) => *code == 429 || *code >= 500,
                // Connection refused/reset/aborted, DNS failure
                None => true,
            },
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-mandated retry delay, when the upstream supplied one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
