//! Bounded metric history for trend evaluation
//!
//! Ring buffer of metric snapshots with FIFO eviction. The check runner is
//! the single writer; the alert engine and orchestrator read it for
//! time-windowed aggregation.

use crate::models::MetricSnapshot;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Default maximum number of retained snapshots
const DEFAULT_MAX_ENTRIES: usize = 500;

/// Aggregation applied to a metric across a time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

/// Bounded, time-ordered buffer of metric snapshots
#[derive(Debug)]
pub struct MetricHistory {
    buffer: VecDeque<MetricSnapshot>,
    max_entries: usize,
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MetricHistory {
    /// Create a history bounded to `max_entries` snapshots
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries: max_entries.max(1),
        }
    }

    /// Append a snapshot, evicting the oldest entry when at capacity
    pub fn push(&mut self, snapshot: MetricSnapshot) {
        while self.buffer.len() >= self.max_entries {
            self.buffer.pop_front();
        }
        self.buffer.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// The most recent snapshot, if any
    pub fn latest(&self) -> Option<&MetricSnapshot> {
        self.buffer.back()
    }

    /// Snapshots within `[now - window, now]`, oldest first
    pub fn window(&self, window: Duration) -> Vec<&MetricSnapshot> {
        let cutoff = cutoff_from(Utc::now(), window);
        self.buffer
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .collect()
    }

    /// Aggregate the numeric values at `path` across the window
    ///
    /// Snapshots missing the path (or holding a non-numeric value there) are
    /// ignored. Returns `None` when no snapshot in the window carries the
    /// metric, so an empty window never divides by zero.
    pub fn aggregate(&self, path: &str, window: Duration, aggregation: Aggregation) -> Option<f64> {
        let values: Vec<f64> = self
            .window(window)
            .iter()
            .filter_map(|s| s.get(path).and_then(|v| v.as_f64()))
            .collect();

        if values.is_empty() {
            return None;
        }

        let result = match aggregation {
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Count => values.len() as f64,
        };
        Some(result)
    }

    /// All retained snapshots, oldest first (for export)
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.buffer.iter().cloned().collect()
    }
}

fn cutoff_from(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(0))
}
