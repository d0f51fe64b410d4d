//! Per-request metrics recording
//!
//! Append-only, capacity-bounded buffer of request outcome records shared by
//! every upstream client in the process. Oldest entries are evicted first
//! once the buffer reaches its cap.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome record for a single request attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    /// Unique id for this attempt
    pub request_id: Uuid,
    /// Upstream service name
    pub service: String,
    /// Logical operation, e.g. "POST /v1/transcribe"
    pub operation: String,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// When the attempt settled
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Error message for failed attempts
    pub error: Option<String>,
    /// Free-form context (attempt number, rejection kind, ...)
    pub metadata: Value,
}

/// Aggregate view over the recorded metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Records currently retained
    pub total: usize,
    /// Successful attempts among retained records
    pub successes: usize,
    /// Failed attempts among retained records
    pub failures: usize,
    /// Success rate (0.0-1.0) over retained records
    pub success_rate: f64,
    /// Mean duration in milliseconds over retained records
    pub avg_duration_ms: f64,
}

/// Bounded recorder of per-request outcomes
pub struct MetricsRecorder {
    capacity: usize,
    entries: Mutex<VecDeque<RequestMetric>>,
}

impl MetricsRecorder {
    /// Create a recorder retaining at most `capacity` records
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Append a record, evicting the oldest entry at capacity
    pub fn record(&self, metric: RequestMetric) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no records are retained
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the retained records, oldest first
    pub fn snapshot(&self) -> Vec<RequestMetric> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Aggregate statistics over the retained records
    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> MetricsSummary {
        let entries = self.entries.lock();
        let total = entries.len();
        let successes = entries.iter().filter(|m| m.success).count();
        let duration_sum: u64 = entries.iter().map(|m| m.duration_ms).sum();

        MetricsSummary {
            total,
            successes,
            failures: total - successes,
            success_rate: if total > 0 {
                successes as f64 / total as f64
            } else {
                0.0
            },
            avg_duration_ms: if total > 0 {
                duration_sum as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}
