//! Workflow data model

use crate::alerts::AlertCondition;
use crate::models::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// What a step does when it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Run a check scenario via the scenario executor
    Test,
    /// Aggregate metrics from the history
    Analysis,
    /// Generate a report via the report collaborator
    Report,
    /// Deliver a message to the notification sink
    Notification,
    /// Run a registered recovery handler
    Recovery,
    /// Run a registered custom handler
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Test => "test",
            StepType::Analysis => "analysis",
            StepType::Report => "report",
            StepType::Notification => "notification",
            StepType::Recovery => "recovery",
            StepType::Custom => "custom",
        }
    }
}

/// One step of a workflow
///
/// Dependencies may only name earlier-declared steps; this is enforced at
/// registration, which also rules out cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Additional attempts after the first failure
    #[serde(default)]
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Proceed with later steps even if this one fails
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// What starts a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    /// Fixed-interval schedule. Cron expressions are accepted by the data
    /// model but rejected at registration: cron parsing is a known gap.
    Schedule {
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_secs: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cron: Option<String>,
    },
    /// An alert at or above this severity fired
    Event { min_severity: Severity },
    /// The condition holds for the latest snapshot
    Condition { condition: AlertCondition },
    Manual,
}

/// Where a queued run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Event,
    Condition,
    Manual,
}

/// Trigger provenance recorded on an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub source: TriggerSource,
    #[serde(default)]
    pub data: Value,
}

/// A pre-run gate condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateCondition {
    /// The condition holds for the latest snapshot
    Metric { condition: AlertCondition },
    /// An alert at or above the severity fired within the window
    Alert {
        min_severity: Severity,
        window_secs: u64,
    },
    /// The current UTC hour is within `[start_hour, end_hour)`
    Time { start_hour: u32, end_hour: u32 },
    /// A registered gate handler approves the run
    Custom { handler: String },
}

/// Gate with its enforcement level
///
/// A failed required gate makes the run attempt a no-op; a failed advisory
/// gate is only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGate {
    #[serde(flatten)]
    pub condition: GateCondition,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Which lifecycle events fan out to the notification sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNotifications {
    #[serde(default)]
    pub on_start: bool,
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default)]
    pub on_error: bool,
    #[serde(default)]
    pub on_step_complete: bool,
    /// Channel names passed through to the sink (opaque to the engine)
    #[serde(default)]
    pub channels: Vec<String>,
}

/// A workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub conditions: Vec<WorkflowGate>,
    /// Orders schedule triggers that become due on the same poll tick;
    /// the execution queue itself is strictly FIFO
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub notifications: WorkflowNotifications,
}

/// Execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reachable only when the scheduler stops mid-run
    Cancelled,
}

/// Step lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// A dependency never completed; not a failure
    Skipped,
}

/// Per-step record within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl StepExecution {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// Aggregate numbers for a finished (or cancelled) execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub success_rate: f64,
}

/// One triggered run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub trigger: TriggerInfo,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub steps: Vec<StepExecution>,
    pub metrics: ExecutionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_deserializes_from_json() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "recover-ui",
            "name": "Recover UI context",
            "triggers": [
                { "type": "event", "min_severity": "critical" },
                { "type": "schedule", "interval_secs": 3600 }
            ],
            "steps": [
                { "id": "diagnose", "name": "Diagnose", "type": "test",
                  "params": { "scenario": "ui-health" } },
                { "id": "report", "name": "Report", "type": "report",
                  "dependencies": ["diagnose"], "retries": 2,
                  "continueOnFailure": true }
            ],
            "conditions": [
                { "type": "time", "start_hour": 0, "end_hour": 24, "required": true }
            ],
            "priority": 5
        }))
        .unwrap();

        assert!(workflow.enabled);
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[1].dependencies, vec!["diagnose"]);
        assert_eq!(workflow.steps[1].retries, 2);
        assert!(workflow.steps[1].continue_on_failure);
        assert_eq!(workflow.priority, 5);
        assert!(matches!(
            workflow.triggers[0],
            WorkflowTrigger::Event {
                min_severity: Severity::Critical
            }
        ));
    }

    #[test]
    fn test_step_serializes_camel_case_keys() {
        let step = WorkflowStep {
            id: "report".to_string(),
            name: "Report".to_string(),
            step_type: StepType::Report,
            params: Value::Null,
            dependencies: vec!["diagnose".to_string()],
            retries: 2,
            timeout_ms: Some(500),
            continue_on_failure: true,
        };

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["continueOnFailure"], true);
        assert_eq!(json["timeoutMs"], 500);
        assert_eq!(json["type"], "report");
        // snake_case spellings must not round-trip
        let lossy: WorkflowStep = serde_json::from_value(json!({
            "id": "x", "name": "x", "type": "test",
            "continue_on_failure": true
        }))
        .unwrap();
        assert!(!lossy.continue_on_failure);
    }

    #[test]
    fn test_gate_flatten_roundtrip() {
        let gate = WorkflowGate {
            condition: GateCondition::Alert {
                min_severity: Severity::Error,
                window_secs: 600,
            },
            required: false,
        };

        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["required"], false);

        let restored: WorkflowGate = serde_json::from_value(json).unwrap();
        assert!(!restored.required);
    }

    #[test]
    fn test_step_execution_starts_pending() {
        let step = StepExecution::pending("diagnose");
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.start_time.is_none());
        assert_eq!(step.retry_count, 0);
    }
}
