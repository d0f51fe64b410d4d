//! Circuit breaker integration tests - per-upstream configuration

use std::time::Duration;

use upstream_failsafe::config::CircuitBreakerConfig;
use upstream_failsafe::error::{Error, Result};
use upstream_failsafe::failsafe::{CircuitBreaker, CircuitState};

fn failing() -> Result<()> {
    Err(Error::Transport {
        status: Some(502),
        code: None,
        message: "bad gateway".to_string(),
        retry_after: None,
    })
}

async fn fail_times(cb: &CircuitBreaker, n: u32) {
    for _ in 0..n {
        let _ = cb.execute("POST /v1/generate", || async { failing() }).await;
    }
}

#[tokio::test]
async fn test_strict_config_opens_early() {
    // Stricter configuration than the defaults
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(60),
        monitoring_period: Duration::from_secs(120),
        request_timeout: None,
    };
    let cb = CircuitBreaker::new("generation", &config);

    fail_times(&cb, 2).await;
    assert_eq!(cb.state(), CircuitState::Closed);

    fail_times(&cb, 1).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn test_lenient_config_tolerates_flaky_upstream() {
    let config = CircuitBreakerConfig {
        failure_threshold: 10,
        reset_timeout: Duration::from_secs(30),
        monitoring_period: Duration::from_secs(120),
        request_timeout: None,
    };
    let cb = CircuitBreaker::new("resolution", &config);

    fail_times(&cb, 5).await;
    assert_eq!(cb.state(), CircuitState::Closed);

    fail_times(&cb, 5).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_full_recovery_cycle() {
    let config = CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout: Duration::from_millis(100),
        monitoring_period: Duration::from_secs(120),
        request_timeout: None,
    };
    let cb = CircuitBreaker::new("transcription", &config);

    fail_times(&cb, 2).await;
    assert_eq!(cb.state(), CircuitState::Open);

    // Still open before the reset timeout elapses
    let early = cb.execute("GET /v1/models", || async { Ok(()) }).await;
    assert!(matches!(early, Err(Error::CircuitOpen { .. })));

    tokio::time::advance(Duration::from_millis(150)).await;

    // Probe succeeds and the circuit closes fully
    cb.execute("GET /v1/models", || async { Ok(()) })
        .await
        .unwrap();
    let status = cb.status();
    assert_eq!(status.state, "closed");
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.success_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_starts_new_cooldown() {
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout: Duration::from_millis(100),
        monitoring_period: Duration::from_secs(120),
        request_timeout: None,
    };
    let cb = CircuitBreaker::new("transcription", &config);

    fail_times(&cb, 1).await;
    tokio::time::advance(Duration::from_millis(150)).await;

    fail_times(&cb, 1).await;
    assert_eq!(cb.state(), CircuitState::Open);

    // Fresh cooldown: rejected again until another reset period passes
    let rejected = cb.execute("GET /v1/models", || async { Ok(()) }).await;
    assert!(matches!(rejected, Err(Error::CircuitOpen { .. })));

    tokio::time::advance(Duration::from_millis(150)).await;
    cb.execute("GET /v1/models", || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_multiple_upstreams_independent_state() {
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(30),
        monitoring_period: Duration::from_secs(120),
        request_timeout: None,
    };

    let cb1 = CircuitBreaker::new("transcription", &config);
    let cb2 = CircuitBreaker::new("generation", &config);

    fail_times(&cb1, 3).await;

    assert_eq!(cb1.state(), CircuitState::Open);
    assert_eq!(cb2.state(), CircuitState::Closed);

    let status = cb2.status();
    assert_eq!(status.failure_count, 0);
}
