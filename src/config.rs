//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Per-service upstream configurations, keyed by service name
    pub upstreams: HashMap<String, UpstreamConfig>,
    /// Session concurrency configuration
    pub concurrency: ConcurrencyConfig,
    /// Metrics recorder configuration
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `UPSTREAM_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, fails to parse, or fails
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("UPSTREAM_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns an error for zero thresholds, zero concurrency, or an
    /// unparseable base URL.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.max_concurrent_sessions == 0 {
            return Err(Error::Config(
                "concurrency.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if self.metrics.buffer_size == 0 {
            return Err(Error::Config(
                "metrics.buffer_size must be at least 1".to_string(),
            ));
        }
        for (name, upstream) in &self.upstreams {
            upstream
                .validate()
                .map_err(|e| Error::Config(format!("upstream '{name}': {e}")))?;
        }
        Ok(())
    }
}

/// Configuration for a single upstream AI service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API key sent as a bearer token (empty = no auth header)
    pub api_key: String,
    /// Base URL for the service
    pub base_url: String,
    /// Per-request transport timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum retry attempts after the initial one
    pub max_retries: u32,
    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub retry_delay_base: Duration,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay_base: Duration::from_millis(1000),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl UpstreamConfig {
    /// Validate this upstream's configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_requests_per_minute == 0 || self.rate_limit.max_requests_per_hour == 0
        {
            return Err(Error::Config(
                "rate_limit windows must allow at least 1 request".to_string(),
            ));
        }
        Ok(())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time to wait before admitting a half-open probe
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Failure-count decay window: a success this long after the last
    /// failure clears the count
    #[serde(with = "humantime_serde")]
    pub monitoring_period: Duration,
    /// Optional budget for the guarded operation; a timeout counts as failure
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            request_timeout: None,
        }
    }
}

/// Fixed-window rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per minute window
    pub max_requests_per_minute: u32,
    /// Requests admitted per hour window
    pub max_requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_requests_per_hour: 1000,
        }
    }
}

/// Session concurrency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneous pipeline sessions; excess work queues FIFO
    pub max_concurrent_sessions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 3,
        }
    }
}

/// Metrics recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Maximum retained request records before oldest-first eviction
    pub buffer_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}
