//! Alert engine: rule registry, cooldowns, firing, and actions
//!
//! Evaluation walks every enabled rule against the cycle snapshot plus the
//! metric history, subject to a per-rule cooldown. The cooldown is recorded
//! before any action runs so a slow action can never cause a duplicate fire.
//! Alert emission and action execution are independent: a failing action is
//! logged and the alert, its history entry, and its statistics stand.

use crate::alerts::AlertCondition;
use crate::error::MonitorError;
use crate::events::{EventBus, EventKind};
use crate::history::MetricHistory;
use crate::models::{generate_id, Alert, MetricSnapshot, Notification, Severity};
use crate::notify::{ChannelConfig, NotificationSink};
use crate::observability::EngineMetrics;
use crate::workflows::{TriggerInfo, TriggerSource, WorkflowOrchestrator};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use async_trait::async_trait;

/// Default bound on retained alerts
const DEFAULT_MAX_ALERT_HISTORY: usize = 200;

/// Kind of action attached to a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Deliver the alert to the notification sink
    Notification,
    /// Run a registered recovery handler
    Recovery,
    /// Re-notify at critical severity
    Escalation,
    /// Enqueue a workflow run
    Workflow,
    /// Run a registered custom handler
    Custom,
}

impl ActionKind {
    fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Notification => "notification",
            ActionKind::Recovery => "recovery",
            ActionKind::Escalation => "escalation",
            ActionKind::Workflow => "workflow",
            ActionKind::Custom => "custom",
        }
    }
}

/// An action executed when a rule fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAction {
    pub kind: ActionKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fixed delay applied before the action runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Action-specific parameters (handler name, workflow id, ...)
    #[serde(default)]
    pub params: Value,
}

fn default_true() -> bool {
    true
}

/// A configured alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub condition: AlertCondition,
    /// Minimum seconds between fires; zero disables the cooldown
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    /// Suggested operator actions carried on every alert this rule emits
    #[serde(default)]
    pub recovery_actions: Vec<String>,
}

/// Handler for recovery/custom actions, registered by name
#[async_trait]
pub trait AlertActionHandler: Send + Sync {
    async fn execute(&self, alert: &Alert, params: &Value) -> anyhow::Result<()>;
}

/// Alert counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total_alerts: u64,
    #[serde(default)]
    pub by_severity: HashMap<Severity, u64>,
    #[serde(default)]
    pub by_rule: HashMap<String, u64>,
}

/// Serializable configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedConfiguration {
    pub rules: Vec<AlertRule>,
    pub channels: ChannelConfig,
    pub statistics: AlertStats,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    /// Bound on the retained alert history
    pub max_alert_history: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            max_alert_history: DEFAULT_MAX_ALERT_HISTORY,
        }
    }
}

/// Evaluates rules against snapshots and drives alert actions
pub struct AlertEngine {
    /// Rules in registration order; evaluation is deterministic
    rules: RwLock<Vec<AlertRule>>,
    /// Rule id -> last fire time
    cooldowns: DashMap<String, Instant>,
    alert_history: RwLock<VecDeque<Alert>>,
    stats: RwLock<AlertStats>,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
    history: Arc<RwLock<MetricHistory>>,
    handlers: RwLock<HashMap<String, Arc<dyn AlertActionHandler>>>,
    /// Target for workflow actions; attached after construction
    orchestrator: RwLock<Option<Arc<WorkflowOrchestrator>>>,
    channels: RwLock<ChannelConfig>,
    /// Running tally of failed actions, read by the scheduler's health checks
    action_failures: AtomicU64,
    metrics: EngineMetrics,
    config: AlertEngineConfig,
}

impl AlertEngine {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        events: EventBus,
        history: Arc<RwLock<MetricHistory>>,
        channels: ChannelConfig,
        config: AlertEngineConfig,
    ) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cooldowns: DashMap::new(),
            alert_history: RwLock::new(VecDeque::with_capacity(config.max_alert_history)),
            stats: RwLock::new(AlertStats::default()),
            sink,
            events,
            history,
            handlers: RwLock::new(HashMap::new()),
            orchestrator: RwLock::new(None),
            channels: RwLock::new(channels),
            action_failures: AtomicU64::new(0),
            metrics: EngineMetrics::new(),
            config,
        }
    }

    /// Attach the workflow orchestrator used by `workflow` actions
    pub async fn attach_orchestrator(&self, orchestrator: Arc<WorkflowOrchestrator>) {
        *self.orchestrator.write().await = Some(orchestrator);
    }

    /// Register a handler for `recovery`/`custom` actions
    pub async fn register_action_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn AlertActionHandler>,
    ) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Add a rule, validating its condition
    pub async fn add_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        rule.condition
            .validate()
            .map_err(|message| MonitorError::RuleEvaluation {
                rule_id: rule.id.clone(),
                message,
            })?;

        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(MonitorError::RuleEvaluation {
                rule_id: rule.id.clone(),
                message: "a rule with this id already exists".to_string(),
            });
        }
        info!(rule_id = %rule.id, name = %rule.name, "Alert rule added");
        rules.push(rule);
        Ok(())
    }

    /// Remove a rule; returns whether it existed
    pub async fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        self.cooldowns.remove(rule_id);
        rules.len() != before
    }

    /// Replace an existing rule in place
    pub async fn update_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        rule.condition
            .validate()
            .map_err(|message| MonitorError::RuleEvaluation {
                rule_id: rule.id.clone(),
                message,
            })?;

        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                *existing = rule;
                Ok(())
            }
            None => Err(MonitorError::RuleEvaluation {
                rule_id: rule.id,
                message: "no rule with this id".to_string(),
            }),
        }
    }

    /// Enable or disable a rule; returns whether it existed
    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().await.clone()
    }

    /// Evaluate every enabled rule against the snapshot, firing as needed
    ///
    /// Returns the alerts fired by this snapshot. Rules inside their
    /// cooldown window are skipped before evaluation.
    pub async fn evaluate_snapshot(&self, snapshot: &MetricSnapshot) -> Vec<Alert> {
        let rules = self.rules.read().await.clone();
        let mut fired = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled) {
            if self.in_cooldown(rule) {
                debug!(rule_id = %rule.id, "Rule skipped (cooldown)");
                continue;
            }

            let triggered = {
                let history = self.history.read().await;
                rule.condition.evaluate(snapshot, &history)
            };
            if !triggered {
                continue;
            }

            let alert = self.fire(rule, snapshot).await;
            fired.push(alert);
        }

        fired
    }

    fn in_cooldown(&self, rule: &AlertRule) -> bool {
        if rule.cooldown_secs == 0 {
            return false;
        }
        match self.cooldowns.get(&rule.id) {
            Some(last) => last.elapsed() < Duration::from_secs(rule.cooldown_secs),
            None => false,
        }
    }

    /// Emit the alert for a triggered rule and run its actions
    async fn fire(&self, rule: &AlertRule, snapshot: &MetricSnapshot) -> Alert {
        // Record the cooldown before any action runs; a slow action must
        // not open a window for duplicate fires.
        self.cooldowns.insert(rule.id.clone(), Instant::now());

        let alert = Alert {
            id: generate_id("alert"),
            timestamp: chrono::Utc::now(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            message: format!("Alert rule '{}' triggered", rule.name),
            details: json!({
                "rule": rule.name,
                "condition": rule.condition,
            }),
            context: Some(snapshot.values.clone()),
            recovery_actions: rule.recovery_actions.clone(),
        };

        info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            severity = %alert.severity,
            "Alert fired"
        );

        {
            let mut history = self.alert_history.write().await;
            while history.len() >= self.config.max_alert_history {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        {
            let mut stats = self.stats.write().await;
            stats.total_alerts += 1;
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
            *stats.by_rule.entry(rule.id.clone()).or_insert(0) += 1;
        }

        self.events.publish(
            EventKind::AlertGenerated,
            "alert_engine",
            serde_json::to_value(&alert).unwrap_or_default(),
        );

        for action in rule.actions.iter().filter(|a| a.enabled) {
            if let Some(delay_ms) = action.delay_ms {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            if let Err(e) = self.run_action(rule, action, &alert).await {
                self.action_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_alert_actions_failed();
                warn!(
                    rule_id = %rule.id,
                    action = action.kind.as_str(),
                    error = %e,
                    "Alert action failed"
                );
            }
        }

        alert
    }

    async fn run_action(
        &self,
        rule: &AlertRule,
        action: &AlertAction,
        alert: &Alert,
    ) -> Result<(), MonitorError> {
        let fail = |message: String| MonitorError::ActionExecution {
            rule_id: rule.id.clone(),
            action: action.kind.as_str().to_string(),
            message,
        };

        match action.kind {
            ActionKind::Notification => {
                let notification = Notification {
                    severity: alert.severity,
                    message: alert.message.clone(),
                    context: alert.context.clone().unwrap_or(Value::Null),
                    recovery_actions: alert.recovery_actions.clone(),
                };
                self.sink
                    .notify(&notification)
                    .await
                    .map_err(|e| fail(e.to_string()))
            }
            ActionKind::Escalation => {
                let notification = Notification {
                    severity: Severity::Critical,
                    message: format!("ESCALATION: {}", alert.message),
                    context: alert.context.clone().unwrap_or(Value::Null),
                    recovery_actions: alert.recovery_actions.clone(),
                };
                self.sink
                    .notify(&notification)
                    .await
                    .map_err(|e| fail(e.to_string()))
            }
            ActionKind::Recovery | ActionKind::Custom => {
                let name = action.params["handler"]
                    .as_str()
                    .ok_or_else(|| fail("missing 'handler' parameter".to_string()))?
                    .to_string();
                let handler = {
                    let handlers = self.handlers.read().await;
                    handlers.get(&name).cloned()
                };
                match handler {
                    Some(handler) => handler
                        .execute(alert, &action.params)
                        .await
                        .map_err(|e| fail(e.to_string())),
                    None => Err(fail(format!("no handler registered as '{}'", name))),
                }
            }
            ActionKind::Workflow => {
                let workflow_id = action.params["workflowId"]
                    .as_str()
                    .ok_or_else(|| fail("missing 'workflowId' parameter".to_string()))?;
                let orchestrator = self.orchestrator.read().await.clone();
                match orchestrator {
                    Some(orchestrator) => {
                        orchestrator
                            .enqueue(
                                workflow_id,
                                TriggerInfo {
                                    source: TriggerSource::Event,
                                    data: serde_json::to_value(alert).unwrap_or_default(),
                                },
                            )
                            .await
                            .map_err(|e| fail(e.to_string()))
                    }
                    None => Err(fail("no orchestrator attached".to_string())),
                }
            }
        }
    }

    /// All retained alerts, oldest first
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alert_history.read().await.iter().cloned().collect()
    }

    /// Bulk-clear the alert history (individual alerts are never deleted)
    pub async fn clear_alerts(&self) {
        self.alert_history.write().await.clear();
    }

    pub async fn stats(&self) -> AlertStats {
        self.stats.read().await.clone()
    }

    /// Total actions that have failed since construction
    pub fn action_failures(&self) -> u64 {
        self.action_failures.load(Ordering::Relaxed)
    }

    pub async fn channels(&self) -> ChannelConfig {
        self.channels.read().await.clone()
    }

    pub async fn set_channels(&self, channels: ChannelConfig) {
        *self.channels.write().await = channels;
    }

    /// Snapshot rules, channels, and statistics for export
    pub async fn export_configuration(&self) -> ExportedConfiguration {
        ExportedConfiguration {
            rules: self.rules().await,
            channels: self.channels().await,
            statistics: self.stats().await,
        }
    }

    /// Replace rules and channels from an exported snapshot
    ///
    /// Statistics in the snapshot are informational and not restored.
    pub async fn import_configuration(
        &self,
        configuration: ExportedConfiguration,
    ) -> Result<(), MonitorError> {
        for rule in &configuration.rules {
            rule.condition
                .validate()
                .map_err(|message| MonitorError::RuleEvaluation {
                    rule_id: rule.id.clone(),
                    message,
                })?;
        }

        let count = configuration.rules.len();
        *self.rules.write().await = configuration.rules;
        *self.channels.write().await = configuration.channels;
        self.cooldowns.clear();
        info!(rules = count, "Configuration imported");
        Ok(())
    }
}
