//! Fixed-window rate limiting

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::{Error, Result};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// A single fixed admission window
struct Window {
    count: u32,
    reset_at: Instant,
    length: Duration,
}

impl Window {
    fn new(length: Duration) -> Self {
        Self {
            count: 0,
            reset_at: Instant::now() + length,
            length,
        }
    }

    /// Lazy reset, strictly after expiry: at `now == reset_at` the old
    /// window still applies
    fn roll(&mut self, now: Instant) {
        if now > self.reset_at {
            self.count = 0;
            self.reset_at = now + self.length;
        }
    }
}

/// Per-upstream admission control over minute and hour windows
///
/// Evaluated before the circuit breaker, so rate-limited calls never count
/// as breaker failures. Rejected calls consume no budget in either window.
pub struct RateLimiter {
    service: String,
    max_per_minute: u32,
    max_per_hour: u32,
    windows: Mutex<(Window, Window)>,
}

impl RateLimiter {
    /// Create a new rate limiter for an upstream service
    #[must_use]
    pub fn new(service: &str, config: &RateLimitConfig) -> Self {
        Self {
            service: service.to_string(),
            max_per_minute: config.max_requests_per_minute,
            max_per_hour: config.max_requests_per_hour,
            windows: Mutex::new((Window::new(MINUTE), Window::new(HOUR))),
        }
    }

    /// Admit one request or reject with the wait until the blocking window
    /// resets
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] naming the exhausted window; neither
    /// window's count is incremented on rejection.
    pub fn check_and_consume(&self) -> Result<()> {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let (minute, hour) = &mut *windows;
        minute.roll(now);
        hour.roll(now);

        if minute.count >= self.max_per_minute {
            let retry_after = minute.reset_at.saturating_duration_since(now);
            warn!(
                service = %self.service,
                scope = "minute",
                retry_in_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimited {
                service: self.service.clone(),
                scope: "minute",
                retry_after,
            });
        }
        if hour.count >= self.max_per_hour {
            let retry_after = hour.reset_at.saturating_duration_since(now);
            warn!(
                service = %self.service,
                scope = "hour",
                retry_in_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimited {
                service: self.service.clone(),
                scope: "hour",
                retry_after,
            });
        }

        minute.count += 1;
        hour.count += 1;
        Ok(())
    }

    /// Get a status snapshot for observability
    pub fn status(&self) -> RateLimiterStatus {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let (minute, hour) = &mut *windows;
        minute.roll(now);
        hour.roll(now);

        RateLimiterStatus {
            service: self.service.clone(),
            minute_used: minute.count,
            minute_limit: self.max_per_minute,
            minute_resets_in_ms: minute.reset_at.saturating_duration_since(now).as_millis()
                as u64,
            hour_used: hour.count,
            hour_limit: self.max_per_hour,
            hour_resets_in_ms: hour.reset_at.saturating_duration_since(now).as_millis()
                as u64,
        }
    }
}

/// Rate limiter status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStatus {
    /// Upstream service name
    pub service: String,
    /// Requests consumed in the current minute window
    pub minute_used: u32,
    /// Minute window limit
    pub minute_limit: u32,
    /// Milliseconds until the minute window resets
    pub minute_resets_in_ms: u64,
    /// Requests consumed in the current hour window
    pub hour_used: u32,
    /// Hour window limit
    pub hour_limit: u32,
    /// Milliseconds until the hour window resets
    pub hour_resets_in_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, per_hour: u32) -> RateLimiter {
        RateLimiter::new(
            "stt",
            &RateLimitConfig {
                max_requests_per_minute: per_minute,
                max_requests_per_hour: per_hour,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_call_in_minute_rejected() {
        let rl = limiter(3, 100);

        for _ in 0..3 {
            rl.check_and_consume().unwrap();
        }

        let err = rl.check_and_consume().unwrap_err();
        match err {
            Error::RateLimited {
                scope, retry_after, ..
            } => {
                assert_eq!(scope, "minute");
                assert!(retry_after <= MINUTE);
            }
            other => panic!("expected RateLimited, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_admits_again() {
        let rl = limiter(3, 100);
        for _ in 0..3 {
            rl.check_and_consume().unwrap();
        }
        assert!(rl.check_and_consume().is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(rl.check_and_consume().is_ok());
        assert_eq!(rl.status().minute_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_consumes_no_budget() {
        let rl = limiter(2, 100);
        rl.check_and_consume().unwrap();
        rl.check_and_consume().unwrap();

        for _ in 0..5 {
            assert!(rl.check_and_consume().is_err());
        }

        let status = rl.status();
        assert_eq!(status.minute_used, 2);
        assert_eq!(status.hour_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_window_blocks_across_minutes() {
        let rl = limiter(100, 3);
        for _ in 0..3 {
            rl.check_and_consume().unwrap();
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        let err = rl.check_and_consume().unwrap_err();
        assert!(matches!(err, Error::RateLimited { scope: "hour", .. }));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(rl.check_and_consume().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_boundary_is_exclusive() {
        let rl = limiter(1, 100);
        rl.check_and_consume().unwrap();

        // Exactly at the reset instant the old window still applies
        tokio::time::advance(MINUTE).await;
        assert!(rl.check_and_consume().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(rl.check_and_consume().is_ok());
    }
}
