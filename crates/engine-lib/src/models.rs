//! Core data models for the monitoring engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Result of running a single check scenario
///
/// Immutable once produced; one instance per scenario per check cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub scenario_name: String,
    pub passed: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Named numeric metrics, keyed by dot-notation path
    /// (e.g. `performance.memoryUsage`)
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl CheckResult {
    /// Build a passing result with no metrics
    pub fn passed(scenario_name: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            passed: true,
            execution_time_ms,
            error: None,
            metrics: HashMap::new(),
        }
    }

    /// Build a failing result carrying the failure message
    pub fn failed(
        scenario_name: impl Into<String>,
        execution_time_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            passed: false,
            execution_time_ms,
            error: Some(error.into()),
            metrics: HashMap::new(),
        }
    }
}

/// One timestamped, nested measurement of the monitored system's state
///
/// Values are addressed by dot-notation paths into the nested JSON object
/// (e.g. `performance.memoryUsage`, `contexts.ui.healthy`). Built once per
/// check cycle and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub values: Value,
}

impl MetricSnapshot {
    pub fn new(values: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            values,
        }
    }

    /// Look up a value by dot-notation path; `None` for missing branches
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.values, path)
    }
}

/// Walk a dot-notation path into a nested JSON object
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Insert a numeric value at a dot-notation path, creating intermediate
/// objects as needed
pub(crate) fn insert_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("object ensured above");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Alert severity levels, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A fired alert
///
/// Created exactly once per rule-trigger event, appended to the bounded
/// alert history, never mutated or individually deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default)]
    pub recovery_actions: Vec<String>,
}

/// Payload handed to a notification sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub context: Value,
    #[serde(default)]
    pub recovery_actions: Vec<String>,
}

/// Generate a short unique id with a component prefix
///
/// Time-based with a process-wide counter to disambiguate ids minted in
/// the same instant.
pub(crate) fn generate_id(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:x}{:x}-{:x}", prefix, now.as_secs(), now.subsec_nanos(), seq)
}
