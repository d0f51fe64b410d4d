//! HTTP transport implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Transport, TransportRequest, TransportResponse};
use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Longest error-body excerpt carried into an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport over a pooled reqwest client
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    bearer: Option<String>,
}

impl HttpTransport {
    /// Create a new HTTP transport from an upstream's configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the client fails
    /// to build.
    pub fn new(config: &UpstreamConfig) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        // A trailing slash keeps Url::join from replacing the last path segment
        let mut raw = config.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url =
            Url::parse(&raw).map_err(|e| Error::Config(format!("invalid base_url: {e}")))?;

        Ok(Arc::new(Self {
            client,
            base_url,
            bearer: (!config.api_key.is_empty()).then(|| config.api_key.clone()),
        }))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| Error::Transport {
                status: None,
                code: Some("url".to_string()),
                message: format!("invalid path '{}': {e}", request.path),
                retry_after: None,
            })?;

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(key) = &self.bearer {
            builder = builder.bearer_auth(key);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(&response, status);
            let body = response.text().await.unwrap_or_default();
            let mut message = body;
            message.truncate(MAX_ERROR_BODY);
            debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                "Upstream returned error status"
            );
            return Err(Error::Transport {
                status: Some(status.as_u16()),
                code: status.canonical_reason().map(str::to_lowercase),
                message,
                retry_after,
            });
        }

        let text = response.text().await.map_err(classify)?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Map reqwest failures into the crate taxonomy, keeping network-level
/// failures distinguishable from HTTP statuses
fn classify(e: reqwest::Error) -> Error {
    let code = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "io"
    };
    Error::Transport {
        status: e.status().map(|s| s.as_u16()),
        code: Some(code.to_string()),
        message: e.to_string(),
        retry_after: None,
    }
}

/// `Retry-After` in whole seconds, honored only on 429/503
fn parse_retry_after(response: &reqwest::Response, status: StatusCode) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
