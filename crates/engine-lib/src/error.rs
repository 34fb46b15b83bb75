//! Error taxonomy for the monitoring engine
//!
//! Cycle- and gate-level failures are contained where they occur and
//! converted into data (a failed check result, an unrecorded run attempt),
//! so they carry no variants here. These variants surface at component
//! boundaries where the caller needs to distinguish the failure class.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A single check scenario failed
    #[error("scenario '{scenario}' failed: {message}")]
    ScenarioFailure { scenario: String, message: String },

    /// A rule condition could not be evaluated (e.g. invalid regex)
    #[error("rule '{rule_id}' evaluation error: {message}")]
    RuleEvaluation { rule_id: String, message: String },

    /// An alert action threw; other actions and the alert itself are unaffected
    #[error("action '{action}' for rule '{rule_id}' failed: {message}")]
    ActionExecution {
        rule_id: String,
        action: String,
        message: String,
    },

    /// A workflow step failed after exhausting its retries
    #[error("step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    /// A workflow definition was rejected at registration
    #[error("invalid workflow '{workflow_id}': {message}")]
    InvalidWorkflow {
        workflow_id: String,
        message: String,
    },

    /// A step exceeded its deadline
    #[error("{what} timed out after {after_ms}ms")]
    Timeout { what: String, after_ms: u64 },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
