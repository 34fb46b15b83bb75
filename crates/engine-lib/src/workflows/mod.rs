//! Workflow orchestration
//!
//! This module provides:
//! - Workflow definitions: dependency-ordered steps, triggers, gate
//!   conditions, and notification subscriptions
//! - The orchestrator: registration-time validation, a FIFO execution
//!   queue drained one run at a time, and the step state machine with
//!   retry, skip, and continue-on-failure semantics

mod model;
mod orchestrator;

pub use model::{
    ExecutionMetrics, ExecutionStatus, GateCondition, StepExecution, StepStatus, StepType,
    TriggerInfo, TriggerSource, Workflow, WorkflowExecution, WorkflowGate, WorkflowNotifications,
    WorkflowStep, WorkflowTrigger,
};
pub use orchestrator::{
    GateHandler, OrchestratorConfig, StepHandler, WorkflowOrchestrator,
};
