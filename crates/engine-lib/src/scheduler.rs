//! Top-level scheduler
//!
//! Owns the interval timers and wires the subsystems together:
//! - real-time check loop (fast cadence, small scenario set)
//! - comprehensive check loop (slow cadence, full categories)
//! - workflow poll loop (due schedule triggers + queue drain)
//! - optional dashboard refresh loop
//!
//! The loops are independent tasks, so a slow comprehensive cycle never
//! delays the real-time tick. Every tick contains its own errors and
//! publishes a `monitoring_error` event rather than terminating the loop.

use crate::alerts::AlertEngine;
use crate::checks::{CheckKind, CheckRunner};
use crate::events::{EventBus, EventKind};
use crate::health::{components, HealthRegistry};
use crate::history::MetricHistory;
use crate::observability::EngineMetrics;
use crate::workflows::WorkflowOrchestrator;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default cadence of the real-time check loop
const DEFAULT_REALTIME_INTERVAL: Duration = Duration::from_secs(30);

/// Default cadence of the comprehensive check loop
const DEFAULT_COMPREHENSIVE_INTERVAL: Duration = Duration::from_secs(300);

/// Default cadence of the workflow poll loop
const DEFAULT_WORKFLOW_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Scheduler timer configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub realtime_interval: Duration,
    pub comprehensive_interval: Duration,
    pub workflow_poll_interval: Duration,
    /// `None` disables the dashboard refresh loop
    pub dashboard_refresh_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            realtime_interval: DEFAULT_REALTIME_INTERVAL,
            comprehensive_interval: DEFAULT_COMPREHENSIVE_INTERVAL,
            workflow_poll_interval: DEFAULT_WORKFLOW_POLL_INTERVAL,
            dashboard_refresh_interval: None,
        }
    }
}

/// Handles owned while the scheduler is running
struct RunningState {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Drives the monitoring loops and owns the start/stop lifecycle
pub struct Scheduler {
    runner: Arc<CheckRunner>,
    alerts: Arc<AlertEngine>,
    orchestrator: Arc<WorkflowOrchestrator>,
    history: Arc<RwLock<MetricHistory>>,
    events: EventBus,
    health: HealthRegistry,
    metrics: EngineMetrics,
    config: SchedulerConfig,
    state: Mutex<Option<RunningState>>,
    /// Action-failure tally at the last health check
    seen_action_failures: AtomicU64,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<CheckRunner>,
        alerts: Arc<AlertEngine>,
        orchestrator: Arc<WorkflowOrchestrator>,
        history: Arc<RwLock<MetricHistory>>,
        events: EventBus,
        health: HealthRegistry,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            runner,
            alerts,
            orchestrator,
            history,
            events,
            health,
            metrics: EngineMetrics::new(),
            config,
            state: Mutex::new(None),
            seen_action_failures: AtomicU64::new(0),
        }
    }

    /// Start the monitoring loops
    ///
    /// Idempotent: a second call while running only logs a warning. One
    /// real-time cycle runs immediately before the timers take over.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("Scheduler already running; start ignored");
            return;
        }

        self.orchestrator.resume();
        self.health.register(components::CHECK_RUNNER).await;
        self.health.register(components::ALERT_ENGINE).await;
        self.health.register(components::ORCHESTRATOR).await;
        self.health.register(components::SCHEDULER).await;

        self.events.publish(
            EventKind::MonitoringStarted,
            "scheduler",
            json!({
                "realtimeIntervalSecs": self.config.realtime_interval.as_secs(),
                "comprehensiveIntervalSecs": self.config.comprehensive_interval.as_secs(),
            }),
        );

        // First cycle runs before the timers so a fresh start produces a
        // snapshot immediately.
        self.run_check_cycle(CheckKind::RealTime).await;

        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(self.clone().check_loop(
            CheckKind::RealTime,
            self.config.realtime_interval,
            shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(self.clone().check_loop(
            CheckKind::Comprehensive,
            self.config.comprehensive_interval,
            shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(self.clone().workflow_loop(
            self.config.workflow_poll_interval,
            shutdown.subscribe(),
        )));
        if let Some(period) = self.config.dashboard_refresh_interval {
            tasks.push(tokio::spawn(
                self.clone().dashboard_loop(period, shutdown.subscribe()),
            ));
        }

        self.health.set_ready(true).await;
        info!(
            realtime_secs = self.config.realtime_interval.as_secs(),
            comprehensive_secs = self.config.comprehensive_interval.as_secs(),
            "Monitoring started"
        );
        *state = Some(RunningState { shutdown, tasks });
    }

    /// Stop the monitoring loops
    ///
    /// Idempotent: a second call only logs a warning. In-flight workflow
    /// executions are marked `cancelled`; completed step results are kept.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            warn!("Scheduler not running; stop ignored");
            return;
        };

        let _ = running.shutdown.send(());
        self.orchestrator.cancel_running().await;
        for task in running.tasks {
            task.abort();
        }

        self.health.set_ready(false).await;
        self.events
            .publish(EventKind::MonitoringStopped, "scheduler", json!({}));
        info!("Monitoring stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn check_loop(
        self: Arc<Self>,
        kind: CheckKind,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        // First tick is one period out; start() already ran a cycle
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_check_cycle(kind).await;
                }
                _ = shutdown.recv() => {
                    debug!(kind = kind.as_str(), "Check loop stopped");
                    break;
                }
            }
        }
    }

    async fn workflow_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.orchestrator.trigger_due_schedules().await;
                    self.metrics
                        .set_workflow_queue_depth(self.orchestrator.queue_len().await as i64);
                    self.orchestrator.drain_queue().await;
                    // A drained queue should be empty; leftovers mean the
                    // consumer is wedged.
                    if self.orchestrator.queue_len().await > 0 {
                        self.health
                            .set_degraded(components::ORCHESTRATOR, "queue not draining")
                            .await;
                    } else {
                        self.health.set_healthy(components::ORCHESTRATOR).await;
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Workflow loop stopped");
                    break;
                }
            }
        }
    }

    async fn dashboard_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.alerts.stats().await;
                    self.events.publish(
                        EventKind::DashboardRefresh,
                        "scheduler",
                        json!({
                            "historySize": self.history.read().await.len(),
                            "queueDepth": self.orchestrator.queue_len().await,
                            "totalAlerts": stats.total_alerts,
                        }),
                    );
                }
                _ = shutdown.recv() => {
                    debug!("Dashboard loop stopped");
                    break;
                }
            }
        }
    }

    /// Run one check cycle and fan its snapshot out to the alert engine and
    /// the orchestrator's condition triggers
    async fn run_check_cycle(&self, kind: CheckKind) {
        let started = Instant::now();
        let outcome = self.runner.run_cycle(kind).await;

        let total = outcome.results.len();
        let failed = outcome.results.iter().filter(|r| !r.passed).count();
        self.metrics
            .observe_cycle(kind.as_str(), started.elapsed().as_secs_f64(), total, failed);
        self.metrics
            .set_history_size(self.history.read().await.len() as i64);

        // An unreachable collaborator is contained as a monitoring error,
        // never a loop termination.
        let mut unreachable = false;
        for failure in outcome.cycle_failures() {
            unreachable = true;
            self.metrics.inc_monitoring_errors();
            self.events.publish(
                EventKind::MonitoringError,
                "scheduler",
                json!({
                    "kind": kind.as_str(),
                    "scenario": failure.scenario_name,
                    "error": failure.error,
                }),
            );
        }
        if unreachable {
            self.health
                .set_degraded(components::CHECK_RUNNER, "collaborator unreachable")
                .await;
        } else {
            self.health.set_healthy(components::CHECK_RUNNER).await;
        }

        let alerts = self.alerts.evaluate_snapshot(&outcome.snapshot).await;
        for alert in &alerts {
            self.metrics.inc_alerts_fired(&alert.severity.to_string());
            self.orchestrator.trigger_on_alert(alert).await;
        }
        self.orchestrator.trigger_on_snapshot(&outcome.snapshot).await;

        // Fresh action failures since the last cycle degrade the alert engine
        let failures = self.alerts.action_failures();
        if failures > self.seen_action_failures.swap(failures, Ordering::Relaxed) {
            self.health
                .set_degraded(components::ALERT_ENGINE, "alert actions failing")
                .await;
        } else {
            self.health.set_healthy(components::ALERT_ENGINE).await;
        }
        self.health.set_healthy(components::SCHEDULER).await;

        self.events.publish(
            EventKind::MonitoringCheckCompleted,
            "scheduler",
            json!({
                "kind": kind.as_str(),
                "total": total,
                "failed": failed,
                "alertsFired": alerts.len(),
            }),
        );
    }

    /// Serialize the engine's observable state for export
    pub async fn export_monitoring_data(&self) -> Value {
        json!({
            "exportedAt": Utc::now(),
            "running": self.is_running().await,
            "configuration": self.alerts.export_configuration().await,
            "alerts": self.alerts.alerts().await,
            "history": self.history.read().await.snapshots(),
            "statistics": self.alerts.stats().await,
            "workflows": self.orchestrator.workflows().await,
            "executions": self.orchestrator.executions().await,
        })
    }
}
