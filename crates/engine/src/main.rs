//! Vigil - continuous monitoring and workflow automation engine
//!
//! This binary wires the engine library to a synthetic scenario executor,
//! seeds the default alert rules, and serves the health/metrics/status API.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_lib::alerts::{AlertEngine, AlertEngineConfig};
use vigil_lib::checks::{CheckRunner, CheckRunnerConfig, ScenarioExecutor};
use vigil_lib::health::HealthRegistry;
use vigil_lib::notify::{ChannelConfig, ConsoleSink, NotificationSink};
use vigil_lib::report::LogReportGenerator;
use vigil_lib::workflows::{OrchestratorConfig, WorkflowOrchestrator};
use vigil_lib::{EventBus, MetricHistory, Scheduler, SchedulerConfig};

mod api;
mod config;
mod seed;
mod synthetic;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting vigil");

    let config = config::EngineConfig::load()?;
    info!(
        realtime_secs = config.realtime_interval_secs,
        comprehensive_secs = config.comprehensive_interval_secs,
        api_port = config.api_port,
        "Engine configured"
    );

    let history = Arc::new(RwLock::new(MetricHistory::new(config.max_data_points)));
    let events = EventBus::default();
    let health_registry = HealthRegistry::new();

    let executor: Arc<dyn ScenarioExecutor> = Arc::new(synthetic::SyntheticExecutor::default());
    let sink: Arc<dyn NotificationSink> = Arc::new(ConsoleSink);

    let runner = Arc::new(CheckRunner::new(
        executor.clone(),
        history.clone(),
        CheckRunnerConfig {
            realtime_scenarios: config.realtime_scenarios.clone(),
            comprehensive_categories: config.comprehensive_categories.clone(),
            scenario_timeout: Duration::from_secs(config.scenario_timeout_secs),
        },
    ));

    let alerts = Arc::new(AlertEngine::new(
        sink.clone(),
        events.clone(),
        history.clone(),
        ChannelConfig {
            console: config.notifications.console,
            email: config.notifications.email.clone(),
            webhook: config.notifications.webhook.clone(),
        },
        AlertEngineConfig::default(),
    ));

    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        executor,
        Arc::new(LogReportGenerator),
        sink,
        history.clone(),
        events.clone(),
        OrchestratorConfig::default(),
    ));
    alerts.attach_orchestrator(orchestrator.clone()).await;

    for rule in seed::default_rules(&config.alert_thresholds) {
        alerts.add_rule(rule).await?;
    }

    let scheduler = Arc::new(Scheduler::new(
        runner,
        alerts,
        orchestrator,
        history,
        events,
        health_registry.clone(),
        SchedulerConfig {
            realtime_interval: Duration::from_secs(config.realtime_interval_secs),
            comprehensive_interval: Duration::from_secs(config.comprehensive_interval_secs),
            workflow_poll_interval: Duration::from_secs(config.workflow_poll_interval_secs),
            dashboard_refresh_interval: config
                .dashboard
                .enabled
                .then(|| Duration::from_millis(config.dashboard.refresh_interval_ms)),
        },
    ));

    scheduler.start().await;

    let app_state = Arc::new(api::AppState::new(health_registry, scheduler.clone()));
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    scheduler.stop().await;

    Ok(())
}
