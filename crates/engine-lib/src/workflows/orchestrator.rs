//! Workflow execution
//!
//! Triggers enqueue `(workflow, trigger)` pairs; a single drain loop runs one
//! execution fully to completion before the next, so concurrent runs never
//! interleave step execution against the shared collaborators. Steps run in
//! declaration order subject to dependency-skip: a step whose dependency
//! never completed is `skipped`, never `failed`.

use crate::events::{EventBus, EventKind};
use crate::history::{Aggregation, MetricHistory};
use crate::models::{generate_id, Alert, MetricSnapshot, Notification, Severity};
use crate::notify::NotificationSink;
use crate::observability::EngineMetrics;
use crate::report::{ReportGenerator, ReportOptions};
use crate::checks::ScenarioExecutor;
use crate::error::MonitorError;
use crate::workflows::model::{
    ExecutionMetrics, ExecutionStatus, GateCondition, StepExecution, StepStatus, StepType,
    TriggerInfo, TriggerSource, Workflow, WorkflowExecution, WorkflowStep, WorkflowTrigger,
};
use chrono::{Timelike, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use async_trait::async_trait;

/// Default per-step deadline
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on retained executions
const DEFAULT_MAX_EXECUTIONS: usize = 100;

/// Default bound on alerts retained for gate evaluation
const DEFAULT_MAX_RECENT_ALERTS: usize = 100;

/// Handler for `recovery`/`custom` steps, registered by name
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step; `context` carries the trigger data of the execution
    async fn execute(&self, step: &WorkflowStep, context: &Value) -> anyhow::Result<Value>;
}

/// Handler for `custom` gate conditions, registered by name
#[async_trait]
pub trait GateHandler: Send + Sync {
    async fn check(&self, latest: Option<&MetricSnapshot>) -> bool;
}

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_execution_history: usize,
    pub max_recent_alerts: usize,
    pub default_step_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_execution_history: DEFAULT_MAX_EXECUTIONS,
            max_recent_alerts: DEFAULT_MAX_RECENT_ALERTS,
            default_step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

/// One queued run
#[derive(Debug, Clone)]
struct QueuedRun {
    workflow_id: String,
    trigger: TriggerInfo,
}

/// Owns workflow definitions, the execution queue, and the step state machine
pub struct WorkflowOrchestrator {
    workflows: RwLock<HashMap<String, Workflow>>,
    queue: Mutex<VecDeque<QueuedRun>>,
    /// Serializes drains: exactly one consumer at a time
    drain_lock: Mutex<()>,
    executions: RwLock<Vec<WorkflowExecution>>,
    history: Arc<RwLock<MetricHistory>>,
    executor: Arc<dyn ScenarioExecutor>,
    reporter: Arc<dyn ReportGenerator>,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
    step_handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
    gate_handlers: RwLock<HashMap<String, Arc<dyn GateHandler>>>,
    /// Alerts seen recently, for alert-gate evaluation
    recent_alerts: RwLock<VecDeque<(Instant, Alert)>>,
    /// Workflow id -> last schedule-trigger enqueue
    last_scheduled: DashMap<String, Instant>,
    stopped: AtomicBool,
    metrics: EngineMetrics,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    pub fn new(
        executor: Arc<dyn ScenarioExecutor>,
        reporter: Arc<dyn ReportGenerator>,
        sink: Arc<dyn NotificationSink>,
        history: Arc<RwLock<MetricHistory>>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            drain_lock: Mutex::new(()),
            executions: RwLock::new(Vec::new()),
            history,
            executor,
            reporter,
            sink,
            events,
            step_handlers: RwLock::new(HashMap::new()),
            gate_handlers: RwLock::new(HashMap::new()),
            recent_alerts: RwLock::new(VecDeque::new()),
            last_scheduled: DashMap::new(),
            stopped: AtomicBool::new(false),
            metrics: EngineMetrics::new(),
            config,
        }
    }

    /// Register a workflow, validating its step graph and triggers
    ///
    /// A step may only depend on earlier-declared steps with known ids, so a
    /// registered graph cannot contain cycles. Cron schedules are rejected
    /// here: cron parsing is not implemented.
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), MonitorError> {
        let invalid = |message: String| MonitorError::InvalidWorkflow {
            workflow_id: workflow.id.clone(),
            message,
        };

        if workflow.steps.is_empty() {
            return Err(invalid("workflow has no steps".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &workflow.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            for dependency in &step.dependencies {
                if dependency == &step.id {
                    return Err(invalid(format!("step '{}' depends on itself", step.id)));
                }
                if !seen.contains(dependency.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on '{}', which is not an earlier-declared step",
                        step.id, dependency
                    )));
                }
            }
        }

        for trigger in &workflow.triggers {
            if let WorkflowTrigger::Schedule {
                interval_secs,
                cron,
            } = trigger
            {
                if cron.is_some() {
                    return Err(invalid(
                        "cron schedules are not implemented; use interval_secs".to_string(),
                    ));
                }
                if interval_secs.is_none() {
                    return Err(invalid(
                        "schedule trigger requires interval_secs".to_string(),
                    ));
                }
            }
        }

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(invalid("a workflow with this id already exists".to_string()));
        }

        // Schedule triggers become due one interval after registration
        self.last_scheduled.insert(workflow.id.clone(), Instant::now());
        info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow registered");
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Remove a workflow; returns whether it existed
    pub async fn remove_workflow(&self, workflow_id: &str) -> bool {
        self.last_scheduled.remove(workflow_id);
        self.workflows.write().await.remove(workflow_id).is_some()
    }

    /// Enable or disable a workflow; returns whether it existed
    pub async fn set_workflow_enabled(&self, workflow_id: &str, enabled: bool) -> bool {
        match self.workflows.write().await.get_mut(workflow_id) {
            Some(workflow) => {
                workflow.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn workflows(&self) -> Vec<Workflow> {
        self.workflows.read().await.values().cloned().collect()
    }

    /// Register a handler for `recovery`/`custom` steps
    pub async fn register_step_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) {
        self.step_handlers.write().await.insert(name.into(), handler);
    }

    /// Register a handler for `custom` gate conditions
    pub async fn register_gate_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn GateHandler>,
    ) {
        self.gate_handlers.write().await.insert(name.into(), handler);
    }

    /// Queue a run of a workflow
    ///
    /// Queued entries are processed strictly in order by `drain_queue`.
    /// Enqueueing a disabled workflow is a logged no-op.
    pub async fn enqueue(
        &self,
        workflow_id: &str,
        trigger: TriggerInfo,
    ) -> Result<(), MonitorError> {
        let enabled = {
            let workflows = self.workflows.read().await;
            match workflows.get(workflow_id) {
                Some(workflow) => workflow.enabled,
                None => {
                    return Err(MonitorError::InvalidWorkflow {
                        workflow_id: workflow_id.to_string(),
                        message: "no workflow with this id".to_string(),
                    })
                }
            }
        };
        if !enabled {
            debug!(workflow_id = %workflow_id, "Enqueue skipped: workflow disabled");
            return Ok(());
        }

        self.queue.lock().await.push_back(QueuedRun {
            workflow_id: workflow_id.to_string(),
            trigger: trigger.clone(),
        });
        self.events.publish(
            EventKind::WorkflowQueued,
            "orchestrator",
            json!({ "workflowId": workflow_id, "trigger": trigger.source }),
        );
        Ok(())
    }

    /// Queue a manual run
    pub async fn trigger_manual(
        &self,
        workflow_id: &str,
        data: Value,
    ) -> Result<(), MonitorError> {
        self.enqueue(
            workflow_id,
            TriggerInfo {
                source: TriggerSource::Manual,
                data,
            },
        )
        .await
    }

    /// React to a fired alert: record it for gates and queue event-triggered
    /// workflows whose severity filter matches
    pub async fn trigger_on_alert(&self, alert: &Alert) {
        {
            let mut recent = self.recent_alerts.write().await;
            while recent.len() >= self.config.max_recent_alerts {
                recent.pop_front();
            }
            recent.push_back((Instant::now(), alert.clone()));
        }

        let matching: Vec<String> = {
            let workflows = self.workflows.read().await;
            workflows
                .values()
                .filter(|w| w.enabled)
                .filter(|w| {
                    w.triggers.iter().any(|t| {
                        matches!(t, WorkflowTrigger::Event { min_severity }
                            if alert.severity >= *min_severity)
                    })
                })
                .map(|w| w.id.clone())
                .collect()
        };

        for workflow_id in matching {
            let trigger = TriggerInfo {
                source: TriggerSource::Event,
                data: serde_json::to_value(alert).unwrap_or_default(),
            };
            if let Err(e) = self.enqueue(&workflow_id, trigger).await {
                warn!(workflow_id = %workflow_id, error = %e, "Event trigger enqueue failed");
            }
        }
    }

    /// React to a new snapshot: queue condition-triggered workflows
    ///
    /// A workflow already sitting in the queue is not enqueued again, so a
    /// condition that holds across consecutive cycles produces one run at a
    /// time rather than piling up.
    pub async fn trigger_on_snapshot(&self, snapshot: &MetricSnapshot) {
        let matching: Vec<String> = {
            let workflows = self.workflows.read().await;
            let history = self.history.read().await;
            workflows
                .values()
                .filter(|w| w.enabled)
                .filter(|w| {
                    w.triggers.iter().any(|t| match t {
                        WorkflowTrigger::Condition { condition } => {
                            condition.evaluate(snapshot, &history)
                        }
                        _ => false,
                    })
                })
                .map(|w| w.id.clone())
                .collect()
        };

        for workflow_id in matching {
            if self.is_queued(&workflow_id).await {
                continue;
            }
            let trigger = TriggerInfo {
                source: TriggerSource::Condition,
                data: json!({ "snapshotTimestamp": snapshot.timestamp }),
            };
            if let Err(e) = self.enqueue(&workflow_id, trigger).await {
                warn!(workflow_id = %workflow_id, error = %e, "Condition trigger enqueue failed");
            }
        }
    }

    /// Queue schedule-triggered workflows that have become due
    ///
    /// Workflows due on the same tick are enqueued in descending priority.
    pub async fn trigger_due_schedules(&self) {
        let mut due: Vec<(u8, String)> = {
            let workflows = self.workflows.read().await;
            workflows
                .values()
                .filter(|w| w.enabled)
                .filter_map(|w| {
                    let interval = w.triggers.iter().find_map(|t| match t {
                        WorkflowTrigger::Schedule {
                            interval_secs: Some(secs),
                            ..
                        } => Some(Duration::from_secs(*secs)),
                        _ => None,
                    })?;
                    let elapsed = self
                        .last_scheduled
                        .get(&w.id)
                        .map(|last| last.elapsed())
                        .unwrap_or(interval);
                    (elapsed >= interval).then(|| (w.priority, w.id.clone()))
                })
                .collect()
        };
        due.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, workflow_id) in due {
            self.last_scheduled.insert(workflow_id.clone(), Instant::now());
            let trigger = TriggerInfo {
                source: TriggerSource::Schedule,
                data: Value::Null,
            };
            if let Err(e) = self.enqueue(&workflow_id, trigger).await {
                warn!(workflow_id = %workflow_id, error = %e, "Schedule trigger enqueue failed");
            }
        }
    }

    async fn is_queued(&self, workflow_id: &str) -> bool {
        self.queue
            .lock()
            .await
            .iter()
            .any(|run| run.workflow_id == workflow_id)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Process every queued run, one fully to completion before the next
    pub async fn drain_queue(&self) {
        let _guard = self.drain_lock.lock().await;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let run = { self.queue.lock().await.pop_front() };
            match run {
                Some(run) => self.run_workflow(run).await,
                None => break,
            }
        }
    }

    /// Clear the stop flag so a restarted scheduler can drain again
    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Stop draining and mark every running execution `cancelled`
    ///
    /// Already-completed step results are retained; only the execution
    /// status changes.
    pub async fn cancel_running(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let mut executions = self.executions.write().await;
        for execution in executions.iter_mut() {
            if execution.status == ExecutionStatus::Running {
                execution.status = ExecutionStatus::Cancelled;
                execution.end_time = Some(Utc::now());
                self.events.publish(
                    EventKind::WorkflowCancelled,
                    "orchestrator",
                    json!({
                        "executionId": execution.id,
                        "workflowId": execution.workflow_id,
                    }),
                );
                info!(
                    execution_id = %execution.id,
                    workflow_id = %execution.workflow_id,
                    "Execution cancelled"
                );
            }
        }
    }

    /// All retained executions, oldest first
    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.executions.read().await.clone()
    }

    pub async fn execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.executions
            .read()
            .await
            .iter()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    async fn run_workflow(&self, run: QueuedRun) {
        let workflow = {
            let workflows = self.workflows.read().await;
            match workflows.get(&run.workflow_id) {
                Some(w) => w.clone(),
                None => {
                    warn!(workflow_id = %run.workflow_id, "Queued workflow no longer registered");
                    return;
                }
            }
        };

        // Required gate failures make the attempt a no-op: nothing is recorded
        for gate in &workflow.conditions {
            let ok = self.evaluate_gate(&gate.condition).await;
            if ok {
                continue;
            }
            if gate.required {
                info!(
                    workflow_id = %workflow.id,
                    gate = ?gate.condition,
                    "Required condition not met; run attempt is a no-op"
                );
                return;
            }
            warn!(workflow_id = %workflow.id, gate = ?gate.condition, "Advisory condition not met");
        }

        let started = Instant::now();
        let mut execution = WorkflowExecution {
            id: generate_id("exec"),
            workflow_id: workflow.id.clone(),
            trigger: run.trigger,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            steps: workflow
                .steps
                .iter()
                .map(|s| StepExecution::pending(&s.id))
                .collect(),
            metrics: ExecutionMetrics {
                steps_total: workflow.steps.len(),
                ..Default::default()
            },
        };

        {
            let mut executions = self.executions.write().await;
            while executions.len() >= self.config.max_execution_history {
                executions.remove(0);
            }
            executions.push(execution.clone());
        }

        self.events.publish(
            EventKind::WorkflowStarted,
            "orchestrator",
            json!({ "executionId": execution.id, "workflowId": workflow.id }),
        );
        if workflow.notifications.on_start {
            self.notify_workflow(
                &workflow,
                Severity::Info,
                format!("Workflow '{}' started", workflow.name),
            )
            .await;
        }

        let mut completed: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for (index, step) in workflow.steps.iter().enumerate() {
            if self.stopped.load(Ordering::SeqCst) {
                self.finalize(&workflow, &mut execution, ExecutionStatus::Cancelled, started)
                    .await;
                return;
            }

            let deps_met = step.dependencies.iter().all(|d| completed.contains(d));
            if !deps_met {
                // Skip is not a failure and does not count as completed
                execution.steps[index].status = StepStatus::Skipped;
                debug!(step_id = %step.id, "Step skipped: dependency never completed");
                self.store_execution(&execution).await;
                continue;
            }
            if aborted {
                // After an abort, steps whose dependencies were met stay pending
                continue;
            }

            execution.steps[index].status = StepStatus::Running;
            execution.steps[index].start_time = Some(Utc::now());
            self.store_execution(&execution).await;

            loop {
                let attempt = execution.steps[index].retry_count;
                match self.execute_step(step, &execution).await {
                    Ok(result) => {
                        execution.steps[index].status = StepStatus::Completed;
                        execution.steps[index].end_time = Some(Utc::now());
                        execution.steps[index].result = Some(result);
                        completed.insert(step.id.clone());
                        execution.metrics.steps_completed += 1;
                        if workflow.notifications.on_step_complete {
                            self.notify_workflow(
                                &workflow,
                                Severity::Info,
                                format!("Step '{}' completed", step.name),
                            )
                            .await;
                        }
                        break;
                    }
                    Err(e) => {
                        if attempt < step.retries {
                            execution.steps[index].retry_count += 1;
                            warn!(
                                step_id = %step.id,
                                attempt = attempt + 1,
                                max_retries = step.retries,
                                error = %e,
                                "Step failed; retrying"
                            );
                            continue;
                        }
                        execution.steps[index].status = StepStatus::Failed;
                        execution.steps[index].end_time = Some(Utc::now());
                        execution.steps[index].error = Some(e.to_string());
                        warn!(step_id = %step.id, error = %e, "Step failed");
                        if !step.continue_on_failure {
                            aborted = true;
                        }
                        break;
                    }
                }
            }
            self.store_execution(&execution).await;
        }

        let final_status = if aborted {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.finalize(&workflow, &mut execution, final_status, started).await;
    }

    async fn finalize(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        status: ExecutionStatus,
        started: Instant,
    ) {
        execution.status = status;
        execution.end_time = Some(Utc::now());
        execution.metrics.duration_ms = started.elapsed().as_millis() as u64;
        execution.metrics.success_rate = if execution.metrics.steps_total > 0 {
            execution.metrics.steps_completed as f64 / execution.metrics.steps_total as f64
        } else {
            0.0
        };
        self.store_execution(execution).await;

        let (kind, severity, phrase) = match status {
            ExecutionStatus::Completed => (EventKind::WorkflowCompleted, Severity::Info, "completed"),
            ExecutionStatus::Failed => (EventKind::WorkflowFailed, Severity::Error, "failed"),
            _ => (EventKind::WorkflowCancelled, Severity::Warning, "cancelled"),
        };
        self.metrics.inc_workflow_executions(phrase);
        self.events.publish(
            kind,
            "orchestrator",
            json!({
                "executionId": execution.id,
                "workflowId": execution.workflow_id,
                "status": execution.status,
                "metrics": execution.metrics,
            }),
        );
        info!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            status = phrase,
            steps_completed = execution.metrics.steps_completed,
            steps_total = execution.metrics.steps_total,
            "Execution finished"
        );

        let wants_notification = match status {
            ExecutionStatus::Completed => workflow.notifications.on_complete,
            ExecutionStatus::Failed => workflow.notifications.on_error,
            _ => false,
        };
        if wants_notification {
            self.notify_workflow(
                workflow,
                severity,
                format!("Workflow '{}' {}", workflow.name, phrase),
            )
            .await;
        }
    }

    /// Replace the stored copy of an execution, preserving an externally
    /// applied `cancelled` status
    async fn store_execution(&self, execution: &WorkflowExecution) {
        let mut executions = self.executions.write().await;
        if let Some(stored) = executions.iter_mut().find(|e| e.id == execution.id) {
            if stored.status == ExecutionStatus::Cancelled
                && execution.status == ExecutionStatus::Running
            {
                // Keep the cancellation but carry over step progress
                let end_time = stored.end_time;
                *stored = execution.clone();
                stored.status = ExecutionStatus::Cancelled;
                stored.end_time = end_time;
            } else {
                *stored = execution.clone();
            }
        }
    }

    async fn execute_step(
        &self,
        step: &WorkflowStep,
        execution: &WorkflowExecution,
    ) -> Result<Value, MonitorError> {
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_step_timeout);

        match tokio::time::timeout(timeout, self.dispatch_step(step, execution, timeout)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(MonitorError::StepExecution {
                step_id: step.id.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(MonitorError::Timeout {
                what: format!("step '{}'", step.id),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn dispatch_step(
        &self,
        step: &WorkflowStep,
        execution: &WorkflowExecution,
        timeout: Duration,
    ) -> anyhow::Result<Value> {
        match step.step_type {
            StepType::Test => {
                let scenario = step.params["scenario"].as_str().unwrap_or(&step.name);
                let result = self.executor.execute(scenario, timeout).await?;
                if result.passed {
                    Ok(serde_json::to_value(&result)?)
                } else {
                    Err(MonitorError::ScenarioFailure {
                        scenario: scenario.to_string(),
                        message: result.error.unwrap_or_else(|| "unspecified".to_string()),
                    }
                    .into())
                }
            }
            StepType::Analysis => {
                let window = Duration::from_secs(step.params["windowSecs"].as_u64().unwrap_or(300));
                let aggregation: Aggregation = step.params["aggregation"]
                    .as_str()
                    .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
                    .unwrap_or(Aggregation::Avg);
                let metrics: Vec<String> = step.params["metrics"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                let history = self.history.read().await;
                let mut results = serde_json::Map::new();
                for metric in metrics {
                    let value = history.aggregate(&metric, window, aggregation);
                    results.insert(metric, value.map(Value::from).unwrap_or(Value::Null));
                }
                Ok(Value::Object(results))
            }
            StepType::Report => {
                let options: ReportOptions = step.params.get("options")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                let alerts: Vec<Alert> = {
                    let recent = self.recent_alerts.read().await;
                    recent.iter().map(|(_, a)| a.clone()).collect()
                };
                let summary = self
                    .reporter
                    .generate(&execution.id, &[], &alerts, &options)
                    .await?;
                Ok(serde_json::to_value(&summary)?)
            }
            StepType::Notification => {
                let message = step.params["message"]
                    .as_str()
                    .unwrap_or(&step.name)
                    .to_string();
                let severity: Severity = step.params["severity"]
                    .as_str()
                    .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
                    .unwrap_or(Severity::Info);
                self.sink
                    .notify(&Notification {
                        severity,
                        message,
                        context: json!({ "executionId": execution.id }),
                        recovery_actions: Vec::new(),
                    })
                    .await?;
                Ok(json!({ "delivered": true }))
            }
            StepType::Recovery | StepType::Custom => {
                let name = step.params["handler"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("step '{}' has no 'handler' parameter", step.id))?
                    .to_string();
                let handler = {
                    let handlers = self.step_handlers.read().await;
                    handlers.get(&name).cloned()
                };
                match handler {
                    Some(handler) => handler.execute(step, &execution.trigger.data).await,
                    None => Err(anyhow::anyhow!("no step handler registered as '{}'", name)),
                }
            }
        }
    }

    async fn evaluate_gate(&self, gate: &GateCondition) -> bool {
        match gate {
            GateCondition::Metric { condition } => {
                let history = self.history.read().await;
                match history.latest() {
                    Some(latest) => condition.evaluate(latest, &history),
                    None => false,
                }
            }
            GateCondition::Alert {
                min_severity,
                window_secs,
            } => {
                let window = Duration::from_secs(*window_secs);
                let recent = self.recent_alerts.read().await;
                recent
                    .iter()
                    .any(|(at, alert)| at.elapsed() <= window && alert.severity >= *min_severity)
            }
            GateCondition::Time {
                start_hour,
                end_hour,
            } => {
                let hour = Utc::now().hour();
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    // Window wraps midnight
                    hour >= *start_hour || hour < *end_hour
                }
            }
            GateCondition::Custom { handler } => {
                let gate_handler = {
                    let handlers = self.gate_handlers.read().await;
                    handlers.get(handler).cloned()
                };
                match gate_handler {
                    Some(gate_handler) => {
                        let history = self.history.read().await;
                        gate_handler.check(history.latest()).await
                    }
                    None => {
                        warn!(handler = %handler, "No gate handler registered; condition not met");
                        false
                    }
                }
            }
        }
    }

    async fn notify_workflow(&self, workflow: &Workflow, severity: Severity, message: String) {
        let notification = Notification {
            severity,
            message,
            context: json!({
                "workflowId": workflow.id,
                "channels": workflow.notifications.channels,
            }),
            recovery_actions: Vec::new(),
        };
        // Delivery is fire-and-forget
        if let Err(e) = self.sink.notify(&notification).await {
            warn!(workflow_id = %workflow.id, error = %e, "Workflow notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, ComparisonOperator};
    use crate::models::CheckResult;
    use crate::report::LogReportGenerator;
    use crate::workflows::model::{WorkflowGate, WorkflowNotifications};
    use std::sync::atomic::AtomicUsize;

    /// Executor whose scenarios fail by name
    struct ScriptedExecutor;

    #[async_trait]
    impl ScenarioExecutor for ScriptedExecutor {
        async fn execute(&self, name: &str, _timeout: Duration) -> anyhow::Result<CheckResult> {
            if name.starts_with("failing") {
                Ok(CheckResult::failed(name, 5, "assertion failed"))
            } else {
                Ok(CheckResult::passed(name, 5))
            }
        }

        async fn execute_by_category(&self, _category: &str) -> anyhow::Result<Vec<CheckResult>> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl NotificationSink for NullSink {
        async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn orchestrator() -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            Arc::new(ScriptedExecutor),
            Arc::new(LogReportGenerator),
            Arc::new(NullSink),
            Arc::new(RwLock::new(MetricHistory::new(10))),
            EventBus::new(64),
            OrchestratorConfig::default(),
        )
    }

    fn test_step(id: &str, scenario: &str, dependencies: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            step_type: StepType::Test,
            params: json!({ "scenario": scenario }),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            retries: 0,
            timeout_ms: None,
            continue_on_failure: false,
        }
    }

    fn workflow(id: &str, steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            enabled: true,
            triggers: Vec::new(),
            steps,
            conditions: Vec::new(),
            priority: 0,
            notifications: WorkflowNotifications::default(),
        }
    }

    #[tokio::test]
    async fn test_registration_rejects_forward_dependency() {
        let orchestrator = orchestrator();
        let result = orchestrator
            .register_workflow(workflow(
                "w",
                vec![test_step("a", "ok", &["b"]), test_step("b", "ok", &[])],
            ))
            .await;
        assert!(matches!(result, Err(MonitorError::InvalidWorkflow { .. })));
    }

    #[tokio::test]
    async fn test_registration_rejects_duplicate_step_and_self_dependency() {
        let orchestrator = orchestrator();

        let duplicate = orchestrator
            .register_workflow(workflow(
                "w1",
                vec![test_step("a", "ok", &[]), test_step("a", "ok", &[])],
            ))
            .await;
        assert!(duplicate.is_err());

        let self_dep = orchestrator
            .register_workflow(workflow("w2", vec![test_step("a", "ok", &["a"])]))
            .await;
        assert!(self_dep.is_err());
    }

    #[tokio::test]
    async fn test_registration_rejects_cron() {
        let orchestrator = orchestrator();
        let mut wf = workflow("w", vec![test_step("a", "ok", &[])]);
        wf.triggers = vec![WorkflowTrigger::Schedule {
            interval_secs: None,
            cron: Some("0 * * * *".to_string()),
        }];

        let result = orchestrator.register_workflow(wf).await;
        match result {
            Err(MonitorError::InvalidWorkflow { message, .. }) => {
                assert!(message.contains("not implemented"));
            }
            other => panic!("expected InvalidWorkflow, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_manual_trigger_runs_steps_in_order() {
        let orchestrator = orchestrator();
        orchestrator
            .register_workflow(workflow(
                "w",
                vec![
                    test_step("a", "ok", &[]),
                    test_step("b", "ok", &["a"]),
                ],
            ))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        assert_eq!(orchestrator.queue_len().await, 1);
        orchestrator.drain_queue().await;

        let executions = orchestrator.executions().await;
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.metrics.steps_completed, 2);
        assert!((execution.metrics.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(execution.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(execution.end_time.is_some());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_fails_execution() {
        // A fails; B and C depend on A; D depends on B and C
        let orchestrator = orchestrator();
        orchestrator
            .register_workflow(workflow(
                "w",
                vec![
                    test_step("a", "failing-check", &[]),
                    test_step("b", "ok", &["a"]),
                    test_step("c", "ok", &["a"]),
                    test_step("d", "ok", &["b", "c"]),
                ],
            ))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.metrics.steps_completed, 0);
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert_eq!(execution.steps[1].status, StepStatus::Skipped);
        assert_eq!(execution.steps[2].status, StepStatus::Skipped);
        assert_eq!(execution.steps[3].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_continue_on_failure_keeps_going() {
        let orchestrator = orchestrator();
        let mut failing = test_step("a", "failing-check", &[]);
        failing.continue_on_failure = true;
        orchestrator
            .register_workflow(workflow(
                "w",
                vec![failing, test_step("b", "ok", &[])],
            ))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert_eq!(execution.steps[1].status, StepStatus::Completed);
        assert_eq!(execution.metrics.steps_completed, 1);
        assert!((execution.metrics.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_step_retries_until_success() {
        struct FlakyHandler {
            attempts: AtomicUsize,
        }

        #[async_trait]
        impl StepHandler for FlakyHandler {
            async fn execute(&self, _step: &WorkflowStep, _context: &Value) -> anyhow::Result<Value> {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(anyhow::anyhow!("transient failure"))
                } else {
                    Ok(json!({ "recovered": true }))
                }
            }
        }

        let orchestrator = orchestrator();
        orchestrator
            .register_step_handler(
                "flaky",
                Arc::new(FlakyHandler {
                    attempts: AtomicUsize::new(0),
                }),
            )
            .await;

        let step = WorkflowStep {
            id: "recover".to_string(),
            name: "recover".to_string(),
            step_type: StepType::Recovery,
            params: json!({ "handler": "flaky" }),
            dependencies: Vec::new(),
            retries: 2,
            timeout_ms: None,
            continue_on_failure: false,
        };
        orchestrator
            .register_workflow(workflow("w", vec![step]))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.steps[0].status, StepStatus::Completed);
        assert_eq!(execution.steps[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_step() {
        let orchestrator = orchestrator();
        let mut step = test_step("a", "failing-check", &[]);
        step.retries = 1;
        orchestrator
            .register_workflow(workflow("w", vec![step]))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert_eq!(execution.steps[0].retry_count, 1);
        // The recorded error names the step and the failing scenario
        let error = execution.steps[0].error.as_deref().unwrap();
        assert!(error.contains("step 'a' failed"));
        assert!(error.contains("scenario 'failing-check' failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_a_failure() {
        struct HangingHandler;

        #[async_trait]
        impl StepHandler for HangingHandler {
            async fn execute(&self, _step: &WorkflowStep, _context: &Value) -> anyhow::Result<Value> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let orchestrator = orchestrator();
        orchestrator
            .register_step_handler("hangs", Arc::new(HangingHandler))
            .await;

        let step = WorkflowStep {
            id: "slow".to_string(),
            name: "slow".to_string(),
            step_type: StepType::Custom,
            params: json!({ "handler": "hangs" }),
            dependencies: Vec::new(),
            retries: 0,
            timeout_ms: Some(50),
            continue_on_failure: false,
        };
        orchestrator
            .register_workflow(workflow("w", vec![step]))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.steps[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_required_gate_failure_is_a_noop() {
        let orchestrator = orchestrator();
        let mut wf = workflow("w", vec![test_step("a", "ok", &[])]);
        wf.conditions = vec![crate::workflows::WorkflowGate {
            condition: GateCondition::Metric {
                condition: AlertCondition::Threshold {
                    metric: "performance.memoryUsage".to_string(),
                    operator: ComparisonOperator::GreaterThan,
                    value: json!(1_000_000),
                },
            },
            required: true,
        }];
        orchestrator.register_workflow(wf).await.unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        // Not recorded at all
        assert!(orchestrator.executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_event_trigger_respects_severity_filter() {
        let orchestrator = orchestrator();
        let mut wf = workflow("w", vec![test_step("a", "ok", &[])]);
        wf.triggers = vec![WorkflowTrigger::Event {
            min_severity: Severity::Critical,
        }];
        orchestrator.register_workflow(wf).await.unwrap();

        let warning = Alert {
            id: "a1".to_string(),
            timestamp: Utc::now(),
            rule_id: "r".to_string(),
            severity: Severity::Warning,
            message: "warn".to_string(),
            details: Value::Null,
            context: None,
            recovery_actions: Vec::new(),
        };
        orchestrator.trigger_on_alert(&warning).await;
        assert_eq!(orchestrator.queue_len().await, 0);

        let mut critical = warning.clone();
        critical.severity = Severity::Critical;
        orchestrator.trigger_on_alert(&critical).await;
        assert_eq!(orchestrator.queue_len().await, 1);
    }

    #[tokio::test]
    async fn test_condition_trigger_deduplicates_queue() {
        let orchestrator = orchestrator();
        let mut wf = workflow("w", vec![test_step("a", "ok", &[])]);
        wf.triggers = vec![WorkflowTrigger::Condition {
            condition: AlertCondition::Threshold {
                metric: "checks.failureRate".to_string(),
                operator: ComparisonOperator::GreaterThan,
                value: json!(0.5),
            },
        }];
        orchestrator.register_workflow(wf).await.unwrap();

        let snapshot = MetricSnapshot::new(json!({ "checks": { "failureRate": 0.9 } }));
        orchestrator.trigger_on_snapshot(&snapshot).await;
        orchestrator.trigger_on_snapshot(&snapshot).await;

        assert_eq!(orchestrator.queue_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_trigger_becomes_due_after_interval() {
        let orchestrator = orchestrator();
        let mut wf = workflow("w", vec![test_step("a", "ok", &[])]);
        wf.triggers = vec![WorkflowTrigger::Schedule {
            interval_secs: Some(60),
            cron: None,
        }];
        orchestrator.register_workflow(wf).await.unwrap();

        orchestrator.trigger_due_schedules().await;
        assert_eq!(orchestrator.queue_len().await, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        orchestrator.trigger_due_schedules().await;
        assert_eq!(orchestrator.queue_len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_marks_running_execution_and_keeps_completed_steps() {
        struct BlockingHandler {
            entered: Arc<tokio::sync::Notify>,
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl StepHandler for BlockingHandler {
            async fn execute(&self, _step: &WorkflowStep, _context: &Value) -> anyhow::Result<Value> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(json!({}))
            }
        }

        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());

        let orchestrator = Arc::new(orchestrator());
        orchestrator
            .register_step_handler(
                "blocks",
                Arc::new(BlockingHandler {
                    entered: entered.clone(),
                    release: release.clone(),
                }),
            )
            .await;

        let blocking_step = WorkflowStep {
            id: "b".to_string(),
            name: "b".to_string(),
            step_type: StepType::Custom,
            params: json!({ "handler": "blocks" }),
            dependencies: Vec::new(),
            retries: 0,
            timeout_ms: None,
            continue_on_failure: false,
        };
        orchestrator
            .register_workflow(workflow(
                "w",
                vec![
                    test_step("a", "ok", &[]),
                    blocking_step,
                    test_step("c", "ok", &[]),
                ],
            ))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        let drainer = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.drain_queue().await })
        };

        // Wait until step "a" completed and "b" is blocked mid-flight
        entered.notified().await;
        orchestrator.cancel_running().await;
        release.notify_one();
        drainer.await.unwrap();

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        // Already-completed step results are retained
        assert_eq!(execution.steps[0].status, StepStatus::Completed);
        assert!(execution.steps[0].result.is_some());
        // The step after the cancellation point never ran
        assert_eq!(execution.steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_disabled_workflow_is_not_enqueued() {
        let orchestrator = orchestrator();
        orchestrator
            .register_workflow(workflow("w", vec![test_step("a", "ok", &[])]))
            .await
            .unwrap();
        orchestrator.set_workflow_enabled("w", false).await;

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        assert_eq!(orchestrator.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_workflow_errors() {
        let orchestrator = orchestrator();
        let result = orchestrator.trigger_manual("missing", json!({})).await;
        assert!(matches!(result, Err(MonitorError::InvalidWorkflow { .. })));
    }

    /// Sum of the finished-executions counter for one status label
    fn executions_counter(status: &str) -> u64 {
        prometheus::gather()
            .into_iter()
            .find(|family| family.get_name() == "vigil_workflow_executions_total")
            .map(|family| {
                family
                    .get_metric()
                    .iter()
                    .filter(|m| {
                        m.get_label()
                            .iter()
                            .any(|l| l.get_name() == "status" && l.get_value() == status)
                    })
                    .map(|m| m.get_counter().get_value() as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_finished_executions_are_counted_by_status() {
        let completed_before = executions_counter("completed");
        let failed_before = executions_counter("failed");

        let orchestrator = orchestrator();
        orchestrator
            .register_workflow(workflow("ok", vec![test_step("a", "ok", &[])]))
            .await
            .unwrap();
        orchestrator
            .register_workflow(workflow("bad", vec![test_step("a", "failing-check", &[])]))
            .await
            .unwrap();
        orchestrator.trigger_manual("ok", json!({})).await.unwrap();
        orchestrator.trigger_manual("bad", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        // Counters are process-global and only ever move up
        assert!(executions_counter("completed") >= completed_before + 1);
        assert!(executions_counter("failed") >= failed_before + 1);
    }

    #[tokio::test]
    async fn test_analysis_step_aggregates_history() {
        let history = Arc::new(RwLock::new(MetricHistory::new(10)));
        {
            let mut h = history.write().await;
            for mb in [100.0, 200.0] {
                h.push(MetricSnapshot::new(
                    json!({ "performance": { "memoryUsage": mb } }),
                ));
            }
        }

        let orchestrator = WorkflowOrchestrator::new(
            Arc::new(ScriptedExecutor),
            Arc::new(LogReportGenerator),
            Arc::new(NullSink),
            history,
            EventBus::new(16),
            OrchestratorConfig::default(),
        );

        let step = WorkflowStep {
            id: "analyze".to_string(),
            name: "analyze".to_string(),
            step_type: StepType::Analysis,
            params: json!({
                "metrics": ["performance.memoryUsage"],
                "windowSecs": 300,
                "aggregation": "avg"
            }),
            dependencies: Vec::new(),
            retries: 0,
            timeout_ms: None,
            continue_on_failure: false,
        };
        orchestrator
            .register_workflow(workflow("w", vec![step]))
            .await
            .unwrap();

        orchestrator.trigger_manual("w", json!({})).await.unwrap();
        orchestrator.drain_queue().await;

        let execution = &orchestrator.executions().await[0];
        assert_eq!(execution.status, ExecutionStatus::Completed);
        let result = execution.steps[0].result.as_ref().unwrap();
        assert_eq!(result["performance.memoryUsage"], json!(150.0));
    }
}
