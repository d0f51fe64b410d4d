//! Upstream client registry
//!
//! One resilient client per configured upstream service, sharing a single
//! process-wide metrics recorder. Breakers and rate limiters stay strictly
//! per-service.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::Result;
use crate::client::UpstreamClient;
use crate::config::{Config, UpstreamConfig};
use crate::failsafe::CircuitBreakerStatus;
use crate::metrics::MetricsRecorder;

/// Registry of per-service resilient clients
pub struct UpstreamRegistry {
    clients: DashMap<String, Arc<UpstreamClient>>,
    metrics: Arc<MetricsRecorder>,
}

impl UpstreamRegistry {
    /// Create an empty registry with a metrics buffer of the given capacity
    #[must_use]
    pub fn new(metrics_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            metrics: Arc::new(MetricsRecorder::new(metrics_capacity)),
        }
    }

    /// Build a registry with one client per configured upstream
    ///
    /// # Errors
    ///
    /// Returns an error if any upstream's transport fails to construct.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::new(config.metrics.buffer_size);
        for (service, upstream) in &config.upstreams {
            registry.register(service, upstream)?;
        }
        Ok(registry)
    }

    /// Register (or replace) the client for a service
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to construct.
    pub fn register(&self, service: &str, config: &UpstreamConfig) -> Result<Arc<UpstreamClient>> {
        let client = Arc::new(UpstreamClient::new(
            service,
            config,
            Arc::clone(&self.metrics),
        )?);
        self.clients
            .insert(service.to_string(), Arc::clone(&client));
        info!(service, base_url = %config.base_url, "Registered upstream");
        Ok(client)
    }

    /// Look up the client for a service
    pub fn get(&self, service: &str) -> Option<Arc<UpstreamClient>> {
        self.clients.get(service).map(|entry| Arc::clone(&entry))
    }

    /// Names of all registered services
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Circuit breaker status for every registered service
    pub fn breaker_statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut statuses: Vec<CircuitBreakerStatus> = self
            .clients
            .iter()
            .map(|e| e.value().circuit_breaker_status())
            .collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }

    /// The shared metrics recorder
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = UpstreamRegistry::new(100);
        registry
            .register("transcription", &UpstreamConfig::default())
            .unwrap();
        registry
            .register("generation", &UpstreamConfig::default())
            .unwrap();

        assert!(registry.get("transcription").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.services(), vec!["generation", "transcription"]);
    }

    #[test]
    fn test_breakers_are_per_service() {
        let registry = UpstreamRegistry::new(100);
        registry
            .register("transcription", &UpstreamConfig::default())
            .unwrap();
        registry
            .register("generation", &UpstreamConfig::default())
            .unwrap();

        let statuses = registry.breaker_statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == "closed"));
    }
}
