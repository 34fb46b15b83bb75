//! Observability infrastructure for the monitoring engine
//!
//! Provides Prometheus metrics (check cycle latency, checks run/failed,
//! alerts fired, action failures, workflow executions, queue depth, history
//! size) behind a process-wide registry handle.

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Default histogram buckets for cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct EngineMetricsInner {
    cycle_latency_seconds: HistogramVec,
    checks_run: IntCounterVec,
    checks_failed: IntCounterVec,
    alerts_fired: IntCounterVec,
    alert_actions_failed: IntCounter,
    workflow_executions: IntCounterVec,
    monitoring_errors: IntCounter,
    workflow_queue_depth: IntGauge,
    history_size: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram_vec!(
                "vigil_cycle_latency_seconds",
                "Time spent running one check cycle",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            checks_run: register_int_counter_vec!(
                "vigil_checks_run_total",
                "Total check scenarios run, by cycle kind",
                &["kind"]
            )
            .expect("Failed to register checks_run"),

            checks_failed: register_int_counter_vec!(
                "vigil_checks_failed_total",
                "Total failed check scenarios, by cycle kind",
                &["kind"]
            )
            .expect("Failed to register checks_failed"),

            alerts_fired: register_int_counter_vec!(
                "vigil_alerts_fired_total",
                "Total alerts fired, by severity",
                &["severity"]
            )
            .expect("Failed to register alerts_fired"),

            alert_actions_failed: register_int_counter!(
                "vigil_alert_actions_failed_total",
                "Total alert actions that returned an error"
            )
            .expect("Failed to register alert_actions_failed"),

            workflow_executions: register_int_counter_vec!(
                "vigil_workflow_executions_total",
                "Total finished workflow executions, by final status",
                &["status"]
            )
            .expect("Failed to register workflow_executions"),

            monitoring_errors: register_int_counter!(
                "vigil_monitoring_errors_total",
                "Total contained monitoring errors"
            )
            .expect("Failed to register monitoring_errors"),

            workflow_queue_depth: register_int_gauge!(
                "vigil_workflow_queue_depth",
                "Workflow runs currently queued"
            )
            .expect("Failed to register workflow_queue_depth"),

            history_size: register_int_gauge!(
                "vigil_history_size",
                "Snapshots currently retained in the metric history"
            )
            .expect("Failed to register history_size"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record one check cycle's latency and counts
    pub fn observe_cycle(&self, kind: &str, duration_secs: f64, total: usize, failed: usize) {
        self.inner()
            .cycle_latency_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
        self.inner()
            .checks_run
            .with_label_values(&[kind])
            .inc_by(total as u64);
        self.inner()
            .checks_failed
            .with_label_values(&[kind])
            .inc_by(failed as u64);
    }

    /// Increment the fired-alerts counter for a severity
    pub fn inc_alerts_fired(&self, severity: &str) {
        self.inner()
            .alerts_fired
            .with_label_values(&[severity])
            .inc();
    }

    pub fn inc_alert_actions_failed(&self) {
        self.inner().alert_actions_failed.inc();
    }

    /// Increment the executions counter for a final status
    pub fn inc_workflow_executions(&self, status: &str) {
        self.inner()
            .workflow_executions
            .with_label_values(&[status])
            .inc();
    }

    pub fn inc_monitoring_errors(&self) {
        self.inner().monitoring_errors.inc();
    }

    pub fn set_workflow_queue_depth(&self, depth: i64) {
        self.inner().workflow_queue_depth.set(depth);
    }

    pub fn set_history_size(&self, size: i64) {
        self.inner().history_size.set(size);
    }
}
