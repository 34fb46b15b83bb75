//! Check execution against the monitored target
//!
//! The runner drives an external `ScenarioExecutor` on two cadences: a fast
//! real-time pass over a small scenario set and a slower comprehensive pass
//! over full categories. A failing scenario becomes a failed `CheckResult`;
//! it never aborts the rest of the batch. An unreachable collaborator
//! synthesizes one critical result so the cycle is never lost silently.

use crate::history::MetricHistory;
use crate::models::{insert_path, CheckResult, MetricSnapshot};
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Default per-scenario timeout
const DEFAULT_SCENARIO_TIMEOUT: Duration = Duration::from_secs(30);

/// Scenario name used for the synthetic result of an unreachable cycle
const CYCLE_FAILURE_SCENARIO: &str = "check_cycle";

/// Trait for scenario execution implementations
///
/// Implementations must not hang past the supplied timeout; the runner
/// enforces its own deadline regardless.
#[async_trait]
pub trait ScenarioExecutor: Send + Sync {
    /// Execute a single named scenario
    async fn execute(&self, name: &str, timeout: Duration) -> Result<CheckResult>;

    /// Execute every scenario in a category
    async fn execute_by_category(&self, category: &str) -> Result<Vec<CheckResult>>;
}

/// Which cadence a check cycle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Fast pass over the configured real-time scenarios
    RealTime,
    /// Full pass over the configured scenario categories
    Comprehensive,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::RealTime => "realtime",
            CheckKind::Comprehensive => "comprehensive",
        }
    }
}

/// Configuration for the check runner
#[derive(Debug, Clone)]
pub struct CheckRunnerConfig {
    /// Scenario names exercised by the real-time pass
    pub realtime_scenarios: Vec<String>,
    /// Categories exercised by the comprehensive pass
    pub comprehensive_categories: Vec<String>,
    /// Per-scenario deadline
    pub scenario_timeout: Duration,
}

impl Default for CheckRunnerConfig {
    fn default() -> Self {
        Self {
            realtime_scenarios: Vec::new(),
            comprehensive_categories: Vec::new(),
            scenario_timeout: DEFAULT_SCENARIO_TIMEOUT,
        }
    }
}

/// Outcome of one check cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub kind: CheckKind,
    pub results: Vec<CheckResult>,
    /// Snapshot built from the cycle's results; also appended to history
    pub snapshot: MetricSnapshot,
}

impl CycleOutcome {
    /// Synthetic results standing in for unreachable categories
    pub fn cycle_failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(|r| r.scenario_name.starts_with(CYCLE_FAILURE_SCENARIO))
    }
}

/// Runs check scenarios on a schedule and feeds the metric history
pub struct CheckRunner {
    executor: Arc<dyn ScenarioExecutor>,
    history: Arc<RwLock<MetricHistory>>,
    config: CheckRunnerConfig,
}

impl CheckRunner {
    pub fn new(
        executor: Arc<dyn ScenarioExecutor>,
        history: Arc<RwLock<MetricHistory>>,
        config: CheckRunnerConfig,
    ) -> Self {
        Self {
            executor,
            history,
            config,
        }
    }

    /// Run one check cycle of the given kind
    ///
    /// Never propagates scenario errors; the returned batch always covers
    /// every scenario attempted. The cycle snapshot is appended to the
    /// shared history before returning.
    pub async fn run_cycle(&self, kind: CheckKind) -> CycleOutcome {
        let results = match kind {
            CheckKind::RealTime => self.run_realtime().await,
            CheckKind::Comprehensive => self.run_comprehensive().await,
        };

        let snapshot = build_snapshot(&results);
        {
            let mut history = self.history.write().await;
            history.push(snapshot.clone());
        }

        debug!(
            kind = kind.as_str(),
            total = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            "Check cycle complete"
        );

        CycleOutcome {
            kind,
            results,
            snapshot,
        }
    }

    async fn run_realtime(&self) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(self.config.realtime_scenarios.len());
        for name in &self.config.realtime_scenarios {
            results.push(self.execute_scenario(name).await);
        }
        results
    }

    async fn run_comprehensive(&self) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for category in &self.config.comprehensive_categories {
            match self.executor.execute_by_category(category).await {
                Ok(batch) => results.extend(batch),
                Err(e) => {
                    warn!(category = %category, error = %e, "Category execution unreachable");
                    results.push(CheckResult::failed(
                        format!("{}:{}", CYCLE_FAILURE_SCENARIO, category),
                        0,
                        format!("category '{}' unreachable: {}", category, e),
                    ));
                }
            }
        }
        results
    }

    /// Execute one scenario, converting errors and timeouts into failed results
    async fn execute_scenario(&self, name: &str) -> CheckResult {
        let start = Instant::now();
        let timeout = self.config.scenario_timeout;

        match tokio::time::timeout(timeout, self.executor.execute(name, timeout)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!(scenario = %name, error = %e, "Scenario failed");
                CheckResult::failed(name, start.elapsed().as_millis() as u64, e.to_string())
            }
            Err(_) => {
                warn!(scenario = %name, timeout_ms = timeout.as_millis() as u64, "Scenario timed out");
                CheckResult::failed(
                    name,
                    timeout.as_millis() as u64,
                    format!("timed out after {}ms", timeout.as_millis()),
                )
            }
        }
    }
}

/// Build the cycle snapshot from a batch of results
///
/// Per-scenario status lands under `checks.<name>`, each result metric at its
/// own dot-notation path, and batch summary counters under `checks`.
pub fn build_snapshot(results: &[CheckResult]) -> MetricSnapshot {
    let mut values = Value::Object(serde_json::Map::new());

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();
    let failure_rate = if total > 0 {
        failed as f64 / total as f64
    } else {
        0.0
    };
    let max_execution_ms = results
        .iter()
        .map(|r| r.execution_time_ms)
        .max()
        .unwrap_or(0);

    insert_path(&mut values, "checks.total", json!(total));
    insert_path(&mut values, "checks.failed", json!(failed));
    insert_path(&mut values, "checks.failureRate", json!(failure_rate));
    insert_path(
        &mut values,
        "checks.maxExecutionTimeMs",
        json!(max_execution_ms),
    );

    for result in results {
        let base = format!("checks.{}", result.scenario_name);
        insert_path(&mut values, &format!("{}.passed", base), json!(result.passed));
        insert_path(
            &mut values,
            &format!("{}.executionTimeMs", base),
            json!(result.execution_time_ms),
        );
        if let Some(ref error) = result.error {
            insert_path(&mut values, &format!("{}.error", base), json!(error));
        }
        for (path, value) in &result.metrics {
            insert_path(&mut values, path, json!(value));
        }
    }

    MetricSnapshot::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor whose scenarios fail or hang by name
    struct ScriptedExecutor {
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScenarioExecutor for ScriptedExecutor {
        async fn execute(&self, name: &str, _timeout: Duration) -> Result<CheckResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match name {
                "fails" => Err(anyhow::anyhow!("connection refused")),
                "hangs" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                _ => {
                    let mut metrics = HashMap::new();
                    metrics.insert("performance.memoryUsage".to_string(), 120.0);
                    Ok(CheckResult {
                        scenario_name: name.to_string(),
                        passed: true,
                        execution_time_ms: 5,
                        error: None,
                        metrics,
                    })
                }
            }
        }

        async fn execute_by_category(&self, category: &str) -> Result<Vec<CheckResult>> {
            if category == "unreachable" {
                return Err(anyhow::anyhow!("target not responding"));
            }
            Ok(vec![
                CheckResult::passed(format!("{}-a", category), 10),
                CheckResult::passed(format!("{}-b", category), 12),
            ])
        }
    }

    fn runner(config: CheckRunnerConfig) -> CheckRunner {
        CheckRunner::new(
            Arc::new(ScriptedExecutor::new()),
            Arc::new(RwLock::new(MetricHistory::new(10))),
            config,
        )
    }

    #[tokio::test]
    async fn test_scenario_failure_does_not_abort_batch() {
        let runner = runner(CheckRunnerConfig {
            realtime_scenarios: vec![
                "fails".to_string(),
                "healthy".to_string(),
            ],
            scenario_timeout: Duration::from_secs(5),
            ..Default::default()
        });

        let outcome = runner.run_cycle(CheckKind::RealTime).await;

        assert_eq!(outcome.results.len(), 2);
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].error.as_deref().unwrap().contains("connection refused"));
        assert!(outcome.results[1].passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_timeout_becomes_failed_result() {
        let runner = runner(CheckRunnerConfig {
            realtime_scenarios: vec!["hangs".to_string()],
            scenario_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let outcome = runner.run_cycle(CheckKind::RealTime).await;

        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.results[0].passed);
        assert!(outcome.results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_category_synthesizes_failed_result() {
        let runner = runner(CheckRunnerConfig {
            comprehensive_categories: vec![
                "unreachable".to_string(),
                "smoke".to_string(),
            ],
            ..Default::default()
        });

        let outcome = runner.run_cycle(CheckKind::Comprehensive).await;

        // One synthetic failure plus the two smoke results
        assert_eq!(outcome.results.len(), 3);
        let synthetic = &outcome.results[0];
        assert!(!synthetic.passed);
        assert!(synthetic.scenario_name.starts_with(CYCLE_FAILURE_SCENARIO));
        assert!(outcome.results[1].passed);
    }

    #[tokio::test]
    async fn test_cycle_appends_snapshot_to_history() {
        let history = Arc::new(RwLock::new(MetricHistory::new(10)));
        let runner = CheckRunner::new(
            Arc::new(ScriptedExecutor::new()),
            history.clone(),
            CheckRunnerConfig {
                realtime_scenarios: vec!["healthy".to_string()],
                ..Default::default()
            },
        );

        runner.run_cycle(CheckKind::RealTime).await;
        runner.run_cycle(CheckKind::RealTime).await;

        assert_eq!(history.read().await.len(), 2);
    }

    #[test]
    fn test_build_snapshot_summary_and_metrics() {
        let mut metrics = HashMap::new();
        metrics.insert("performance.memoryUsage".to_string(), 200.0);

        let results = vec![
            CheckResult {
                scenario_name: "login".to_string(),
                passed: true,
                execution_time_ms: 40,
                error: None,
                metrics,
            },
            CheckResult::failed("search", 90, "element not found"),
        ];

        let snapshot = build_snapshot(&results);

        assert_eq!(snapshot.get("checks.total").unwrap().as_u64(), Some(2));
        assert_eq!(snapshot.get("checks.failed").unwrap().as_u64(), Some(1));
        assert_eq!(
            snapshot.get("checks.failureRate").unwrap().as_f64(),
            Some(0.5)
        );
        assert_eq!(
            snapshot.get("checks.maxExecutionTimeMs").unwrap().as_u64(),
            Some(90)
        );
        assert_eq!(
            snapshot.get("checks.login.passed").unwrap().as_bool(),
            Some(true)
        );
        assert_eq!(
            snapshot.get("performance.memoryUsage").unwrap().as_f64(),
            Some(200.0)
        );
        assert!(snapshot
            .get("checks.search.error")
            .unwrap()
            .as_str()
            .unwrap()
            .contains("element not found"));
    }

    #[test]
    fn test_build_snapshot_empty_batch() {
        let snapshot = build_snapshot(&[]);
        assert_eq!(snapshot.get("checks.total").unwrap().as_u64(), Some(0));
        assert_eq!(snapshot.get("checks.failureRate").unwrap().as_f64(), Some(0.0));
    }
}
