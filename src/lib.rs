//! Resilient upstream-client layer
//!
//! Makes every outbound call to an unreliable third-party AI service safe
//! under partial failure, overload, and concurrency pressure.
//!
//! # Features
//!
//! - **Circuit breaking**: per-upstream CLOSED/OPEN/HALF_OPEN state machine
//!   with single-probe recovery
//! - **Rate limiting**: fixed per-minute and per-hour admission windows with
//!   wait-time hints
//! - **Retries**: classification-aware exponential backoff with jitter and
//!   `Retry-After` support
//! - **Backpressure**: bounded session concurrency with a cancellable FIFO
//!   queue
//! - **Observability**: bounded per-request metrics buffer and serializable
//!   status snapshots

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod metrics;
pub mod registry;
pub mod transport;

pub use client::UpstreamClient;
pub use concurrency::{ConcurrencyController, ControllerStatus};
pub use config::{Config, UpstreamConfig};
pub use error::{Error, Result};
pub use metrics::{MetricsRecorder, RequestMetric};
pub use registry::UpstreamRegistry;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
