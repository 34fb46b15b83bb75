//! Rule-based alerting
//!
//! This module provides:
//! - A closed-form condition AST (threshold, trend, pattern, composite)
//!   evaluated against the current snapshot and the metric history
//! - The alert engine: rule registry, per-rule cooldowns, alert emission,
//!   action execution, statistics, and configuration export/import

mod condition;
mod engine;

pub use condition::{AlertCondition, ComparisonOperator, LogicalOperator};
pub use engine::{
    ActionKind, AlertAction, AlertActionHandler, AlertEngine, AlertEngineConfig, AlertRule,
    AlertStats, ExportedConfiguration,
};
