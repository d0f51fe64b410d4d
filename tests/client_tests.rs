//! End-to-end pipeline tests over a scripted transport

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use upstream_failsafe::UpstreamClient;
use upstream_failsafe::config::{CircuitBreakerConfig, RateLimitConfig, UpstreamConfig};
use upstream_failsafe::error::{Error, Result};
use upstream_failsafe::metrics::MetricsRecorder;
use upstream_failsafe::transport::{Transport, TransportRequest, TransportResponse};

/// One scripted upstream outcome
enum Step {
    Payload(Value),
    Status(u16),
    RetryAfter(u16, u64),
    Network,
}

/// Transport that replays a script and counts calls
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: TransportRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Step::Status(500));
        match step {
            Step::Payload(body) => Ok(TransportResponse { status: 200, body }),
            Step::Status(code) => Err(Error::Transport {
                status: Some(code),
                code: None,
                message: "scripted failure".to_string(),
                retry_after: None,
            }),
            Step::RetryAfter(code, secs) => Err(Error::Transport {
                status: Some(code),
                code: None,
                message: "scripted failure".to_string(),
                retry_after: Some(Duration::from_secs(secs)),
            }),
            Step::Network => Err(Error::Transport {
                status: None,
                code: Some("connect".to_string()),
                message: "connection refused".to_string(),
                retry_after: None,
            }),
        }
    }
}

fn config(max_retries: u32, failure_threshold: u32) -> UpstreamConfig {
    UpstreamConfig {
        max_retries,
        retry_delay_base: Duration::from_millis(100),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_millis(100),
            monitoring_period: Duration::from_secs(60),
            request_timeout: None,
        },
        rate_limit: RateLimitConfig {
            max_requests_per_minute: 100,
            max_requests_per_hour: 1000,
        },
        ..UpstreamConfig::default()
    }
}

fn client(config: &UpstreamConfig, transport: &Arc<ScriptedTransport>) -> UpstreamClient {
    UpstreamClient::with_transport(
        "transcription",
        config,
        Arc::clone(transport) as Arc<dyn Transport>,
        Arc::new(MetricsRecorder::new(100)),
    )
}

#[tokio::test]
async fn test_success_returns_payload() {
    let transport = ScriptedTransport::new(vec![Step::Payload(json!({"text": "hello"}))]);
    let client = client(&config(3, 5), &transport);

    let payload = client
        .post("/v1/transcribe", json!({"url": "https://example.com/a.mp4"}))
        .await
        .unwrap();

    assert_eq!(payload, json!({"text": "hello"}));
    assert_eq!(transport.calls(), 1);

    let metrics = client.metrics();
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].success);
    assert_eq!(metrics[0].operation, "POST /v1/transcribe");
    assert_eq!(metrics[0].metadata["attempt"], json!(0));
}

#[tokio::test]
async fn test_bad_request_attempted_once() {
    let transport = ScriptedTransport::new(vec![Step::Status(400)]);
    let client = client(&config(3, 5), &transport);

    let err = client.get("/v1/models").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Transport {
            status: Some(400),
            ..
        }
    ));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_retried_to_exhaustion() {
    let transport =
        ScriptedTransport::new(vec![Step::Status(500), Step::Status(500), Step::Status(500)]);
    let client = client(&config(2, 10), &transport);

    let err = client.get("/v1/models").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Transport {
            status: Some(500),
            ..
        }
    ));
    assert_eq!(transport.calls(), 3);

    let metrics = client.metrics();
    assert_eq!(metrics.len(), 3);
    assert!(metrics.iter().all(|m| !m.success));
    assert_eq!(metrics[2].metadata["attempt"], json!(2));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let transport = ScriptedTransport::new(vec![
        Step::Network,
        Step::Status(503),
        Step::Payload(json!({"ok": true})),
    ]);
    let client = client(&config(3, 10), &transport);

    let payload = client.get("/v1/models").await.unwrap();

    assert_eq!(payload, json!({"ok": true}));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_header_overrides_backoff() {
    let transport = ScriptedTransport::new(vec![
        Step::RetryAfter(429, 7),
        Step::Payload(json!({"ok": true})),
    ]);
    let client = client(&config(1, 10), &transport);

    let start = tokio::time::Instant::now();
    client.get("/v1/models").await.unwrap();

    assert_eq!(transport.calls(), 2);
    // The 7s server hint replaced the ~100ms computed backoff
    assert!(start.elapsed() >= Duration::from_secs(7));
}

#[tokio::test]
async fn test_rate_limit_rejects_before_transport() {
    let transport = ScriptedTransport::new(vec![
        Step::Payload(json!(1)),
        Step::Payload(json!(2)),
        Step::Payload(json!(3)),
    ]);
    let mut cfg = config(0, 5);
    cfg.rate_limit.max_requests_per_minute = 2;
    let client = client(&cfg, &transport);

    client.get("/v1/models").await.unwrap();
    client.get("/v1/models").await.unwrap();
    let err = client.get("/v1/models").await.unwrap_err();

    assert!(matches!(err, Error::RateLimited { .. }));
    assert_eq!(transport.calls(), 2);

    // Rejection is recorded without a transport attempt
    let metrics = client.metrics();
    assert_eq!(metrics.len(), 3);
    assert!(!metrics[2].success);
    assert_eq!(metrics[2].metadata["rejected"], json!("rate_limit"));
}

#[tokio::test]
async fn test_open_breaker_skips_transport() {
    let transport = ScriptedTransport::new(vec![Step::Status(500), Step::Status(500)]);
    let client = client(&config(0, 2), &transport);

    let _ = client.get("/v1/models").await;
    let _ = client.get("/v1/models").await;
    assert_eq!(client.circuit_breaker_status().state, "open");

    let err = client.get("/v1/models").await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_rate_limited_calls_do_not_trip_breaker() {
    let transport = ScriptedTransport::new(vec![Step::Payload(json!(1))]);
    let mut cfg = config(0, 5);
    cfg.rate_limit.max_requests_per_minute = 1;
    let client = client(&cfg, &transport);

    client.get("/v1/models").await.unwrap();
    for _ in 0..10 {
        let _ = client.get("/v1/models").await;
    }

    let status = client.circuit_breaker_status();
    assert_eq!(status.state, "closed");
    assert_eq!(status.failure_count, 0);
}

#[tokio::test]
async fn test_health_check_bypasses_failsafe() {
    let transport = ScriptedTransport::new(vec![
        Step::Payload(json!({"status": "ok"})),
        Step::Network,
    ]);
    let client = client(&config(3, 5), &transport);

    assert!(client.health_check("/health").await);
    assert!(!client.health_check("/health").await);

    // Probes hit the transport directly and are not recorded
    assert_eq!(transport.calls(), 2);
    assert!(client.metrics().is_empty());
}
