//! Resilient upstream client
//!
//! Composition root for a single upstream service: every call flows through
//! rate limit → circuit breaker → retry → transport, and every attempt is
//! recorded by the shared metrics recorder.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::UpstreamConfig;
use crate::failsafe::{CircuitBreakerStatus, Failsafe, RateLimiterStatus, with_retry};
use crate::metrics::{MetricsRecorder, MetricsSummary, RequestMetric};
use crate::transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
use crate::{Error, Result};

/// Resilient client for one upstream AI service
pub struct UpstreamClient {
    service: String,
    failsafe: Failsafe,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
}

impl UpstreamClient {
    /// Create a client backed by the default HTTP transport
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed from the
    /// configuration.
    pub fn new(
        service: &str,
        config: &UpstreamConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(service, config, transport, metrics))
    }

    /// Create a client over an injected transport
    #[must_use]
    pub fn with_transport(
        service: &str,
        config: &UpstreamConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            service: service.to_string(),
            failsafe: Failsafe::new(service, config),
            transport,
            metrics,
        }
    }

    /// GET a path
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None, HashMap::new()).await
    }

    /// POST a JSON body to a path
    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body), HashMap::new())
            .await
    }

    /// PUT a JSON body to a path
    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::PUT, path, Some(body), HashMap::new())
            .await
    }

    /// DELETE a path
    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, None, HashMap::new())
            .await
    }

    /// Execute one logical call through the full failsafe pipeline
    ///
    /// # Errors
    ///
    /// Surfaces admission rejections, breaker fail-fasts, and the last
    /// transport error after retry exhaustion, identity intact.
    #[tracing::instrument(
        skip(self, body, headers),
        fields(
            service = %self.service,
            request_id = %Uuid::new_v4()
        )
    )]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: HashMap<String, String>,
    ) -> Result<Value> {
        let operation = format!("{method} {path}");

        // Admission control first: rejected calls never count as breaker
        // failures and consume no rate budget
        if let Err(e) = self.failsafe.rate_limiter.check_and_consume() {
            warn!(operation = %operation, error = %e, "Request rejected by rate limiter");
            self.record_rejection(&operation, &e, "rate_limit");
            return Err(e);
        }

        let attempt = AtomicU32::new(0);
        let result = self
            .failsafe
            .circuit_breaker
            .execute(&operation, || {
                with_retry(&self.failsafe.retry_policy, &operation, || {
                    let attempt_no = attempt.fetch_add(1, Ordering::Relaxed);
                    self.attempt(&operation, &method, path, body.clone(), headers.clone(), attempt_no)
                })
            })
            .await;

        match result {
            Ok(response) => {
                debug!(operation = %operation, status = response.status, "Request completed");
                Ok(response.body)
            }
            Err(e) => {
                // Fail-fast rejections and breaker timeouts never reach the
                // per-attempt recording path
                match &e {
                    Error::CircuitOpen { .. } => {
                        self.record_rejection(&operation, &e, "circuit_open");
                    }
                    Error::CircuitSaturated { .. } => {
                        self.record_rejection(&operation, &e, "circuit_saturated");
                    }
                    Error::Timeout { .. } => {
                        self.record_rejection(&operation, &e, "request_timeout");
                    }
                    _ => {}
                }
                warn!(operation = %operation, error = %e, "Request failed");
                Err(e)
            }
        }
    }

    /// Probe an endpoint directly, bypassing the failsafe pipeline
    ///
    /// A tripped breaker must not mask recovery checks, so this goes
    /// straight to the transport.
    pub async fn health_check(&self, endpoint: &str) -> bool {
        match self
            .transport
            .send(TransportRequest::new(Method::GET, endpoint))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(service = %self.service, endpoint, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Upstream service name
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Snapshot of the shared metrics buffer
    pub fn metrics(&self) -> Vec<RequestMetric> {
        self.metrics.snapshot()
    }

    /// Aggregate metrics view
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Circuit breaker status snapshot
    pub fn circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.failsafe.circuit_breaker.status()
    }

    /// Rate limiter status snapshot
    pub fn rate_limiter_status(&self) -> RateLimiterStatus {
        self.failsafe.rate_limiter.status()
    }

    /// Run a single transport attempt and record its outcome
    async fn attempt(
        &self,
        operation: &str,
        method: &Method,
        path: &str,
        body: Option<Value>,
        headers: HashMap<String, String>,
        attempt_no: u32,
    ) -> Result<TransportResponse> {
        let started_at = Utc::now();
        let started = Instant::now();

        let mut request = TransportRequest::new(method.clone(), path).with_headers(headers);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        let result = self.transport.send(request).await;

        self.metrics.record(RequestMetric {
            request_id: Uuid::new_v4(),
            service: self.service.clone(),
            operation: operation.to_string(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            metadata: json!({ "attempt": attempt_no }),
        });

        result
    }

    /// Record a failure whose operation never ran (or was cut off before
    /// the attempt could settle)
    fn record_rejection(&self, operation: &str, error: &Error, kind: &str) {
        let now = Utc::now();
        self.metrics.record(RequestMetric {
            request_id: Uuid::new_v4(),
            service: self.service.clone(),
            operation: operation.to_string(),
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            success: false,
            error: Some(error.to_string()),
            metadata: json!({ "rejected": kind }),
        });
    }
}
