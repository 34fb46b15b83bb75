//! Engine configuration

use anyhow::Result;
use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Real-time check interval in seconds
    #[serde(default = "default_realtime_interval")]
    pub realtime_interval_secs: u64,

    /// Comprehensive check interval in seconds
    #[serde(default = "default_comprehensive_interval")]
    pub comprehensive_interval_secs: u64,

    /// Workflow poll interval in seconds
    #[serde(default = "default_workflow_poll_interval")]
    pub workflow_poll_interval_secs: u64,

    /// Scenarios exercised by the real-time pass
    #[serde(default = "default_realtime_scenarios")]
    pub realtime_scenarios: Vec<String>,

    /// Categories exercised by the comprehensive pass
    #[serde(default = "default_comprehensive_categories")]
    pub comprehensive_categories: Vec<String>,

    /// Per-scenario timeout in seconds
    #[serde(default = "default_scenario_timeout")]
    pub scenario_timeout_secs: u64,

    /// Snapshots retained in the metric history
    #[serde(default = "default_max_data_points")]
    pub max_data_points: usize,

    #[serde(default)]
    pub alert_thresholds: AlertThresholds,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub dashboard: DashboardSettings,
}

/// Thresholds the seeded default rules are built from
#[derive(Debug, Clone, Deserialize)]
pub struct AlertThresholds {
    /// Failure rate per cycle that fires the failure-rate rule
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Slowest acceptable scenario execution time
    #[serde(default = "default_execution_time_ms")]
    pub execution_time_ms: u64,

    /// Average memory usage that fires the memory rule
    #[serde(default = "default_memory_usage_mb")]
    pub memory_usage_mb: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            execution_time_ms: default_execution_time_ms(),
            memory_usage_mb: default_memory_usage_mb(),
        }
    }
}

/// Notification channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_console")]
    pub console: bool,

    #[serde(default)]
    pub email: Vec<String>,

    #[serde(default)]
    pub webhook: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            console: default_console(),
            email: Vec::new(),
            webhook: None,
        }
    }
}

/// Dashboard refresh settings
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_realtime_interval() -> u64 {
    30
}

fn default_comprehensive_interval() -> u64 {
    300
}

fn default_workflow_poll_interval() -> u64 {
    5
}

fn default_realtime_scenarios() -> Vec<String> {
    vec!["heartbeat".to_string(), "navigation".to_string()]
}

fn default_comprehensive_categories() -> Vec<String> {
    vec!["smoke".to_string()]
}

fn default_scenario_timeout() -> u64 {
    30
}

fn default_max_data_points() -> usize {
    500
}

fn default_failure_rate() -> f64 {
    0.5
}

fn default_execution_time_ms() -> u64 {
    5000
}

fn default_memory_usage_mb() -> f64 {
    500.0
}

fn default_console() -> bool {
    true
}

fn default_refresh_interval_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            realtime_interval_secs: default_realtime_interval(),
            comprehensive_interval_secs: default_comprehensive_interval(),
            workflow_poll_interval_secs: default_workflow_poll_interval(),
            realtime_scenarios: default_realtime_scenarios(),
            comprehensive_categories: default_comprehensive_categories(),
            scenario_timeout_secs: default_scenario_timeout(),
            max_data_points: default_max_data_points(),
            alert_thresholds: AlertThresholds::default(),
            notifications: NotificationSettings::default(),
            dashboard: DashboardSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (prefix `VIGIL`)
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("VIGIL")
                    .separator("__")
                    .list_separator(",")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config
            .try_deserialize()
            .unwrap_or_else(|_| EngineConfig::default()))
    }
}
