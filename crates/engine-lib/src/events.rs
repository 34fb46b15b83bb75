//! Typed event stream for dashboards and cross-component wiring
//!
//! A broadcast-backed publish/subscribe bus keyed by event kind. Each
//! subscriber gets its own receiver and sees events in publish order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the broadcast channel
const DEFAULT_CAPACITY: usize = 256;

/// Kind of a monitoring event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MonitoringStarted,
    MonitoringStopped,
    MonitoringCheckCompleted,
    MonitoringError,
    AlertGenerated,
    WorkflowQueued,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    DashboardRefresh,
}

/// A single event on the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub source: String,
}

impl MonitorEvent {
    pub fn new(kind: EventKind, source: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
            source: source.into(),
        }
    }
}

/// Publish/subscribe bus for monitor events
///
/// Cloning the bus shares the underlying channel. Publishing never blocks;
/// events published while no subscriber exists are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, kind: EventKind, source: &str, data: Value) {
        let event = MonitorEvent::new(kind, source, data);
        // A send error only means there are no subscribers right now
        if self.tx.send(event).is_err() {
            debug!(kind = ?kind, "Event published with no subscribers");
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
