//! Engine library for continuous monitoring and workflow automation
//!
//! This crate provides the core functionality for:
//! - Check execution on real-time and comprehensive cadences
//! - Rule-based alerting with cooldowns and actions
//! - Dependency-ordered workflow orchestration
//! - The top-level scheduler and its event stream
//! - Health checks and observability

pub mod alerts;
pub mod checks;
pub mod error;
pub mod events;
pub mod health;
pub mod history;
pub mod models;
pub mod notify;
pub mod observability;
pub mod report;
pub mod scheduler;
pub mod workflows;

pub use error::{MonitorError, Result};
pub use events::{EventBus, EventKind, MonitorEvent};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{Aggregation, MetricHistory};
pub use models::*;
pub use observability::EngineMetrics;
pub use scheduler::{Scheduler, SchedulerConfig};
