//! Transport seam for upstream requests
//!
//! The resilient client never talks to the network directly; it wraps a
//! [`Transport`] implementation. [`HttpTransport`] is the default, and tests
//! inject mocks through the same trait.

mod http;

pub use http::HttpTransport;

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::Result;

/// A single outbound request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the upstream's base URL
    pub path: String,
    /// Optional JSON body
    pub body: Option<Value>,
    /// Extra headers for this request
    pub headers: HashMap<String, String>,
}

impl TransportRequest {
    /// Create a bodyless request
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            body: None,
            headers: HashMap::new(),
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach extra headers
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// A successful upstream response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON payload (`Null` for empty bodies)
    pub body: Value,
}

/// Outbound transport contract
///
/// Implementations map their failures into the crate error taxonomy so the
/// retry executor can classify them; non-2xx responses are failures carrying
/// the original status.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the parsed response
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}
