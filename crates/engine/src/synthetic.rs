//! Built-in synthetic scenario executor
//!
//! Stands in for a real target integration so the engine runs end-to-end out
//! of the box. Readings follow a deterministic cycle: memory climbs and
//! resets, and every ninth scenario run fails.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use vigil_lib::checks::ScenarioExecutor;
use vigil_lib::models::CheckResult;

/// Runs between failures in the synthetic failure cycle
const FAILURE_PERIOD: u64 = 9;

/// Scenario executor producing synthetic readings
pub struct SyntheticExecutor {
    ticks: AtomicU64,
    base_memory_mb: f64,
}

impl Default for SyntheticExecutor {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl SyntheticExecutor {
    pub fn new(base_memory_mb: f64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            base_memory_mb,
        }
    }

    fn run_once(&self, name: &str) -> CheckResult {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);

        if tick % FAILURE_PERIOD == FAILURE_PERIOD - 1 {
            return CheckResult::failed(name, 25, "synthetic check failure");
        }

        // Sawtooth memory profile so trend rules have something to chew on
        let memory_mb = self.base_memory_mb + (tick % 12) as f64 * 20.0;
        let cpu_percent = 10.0 + (tick % 7) as f64 * 5.0;
        let execution_time_ms = 5 + (tick % 4) * 10;

        let mut metrics = HashMap::new();
        metrics.insert("performance.memoryUsage".to_string(), memory_mb);
        metrics.insert("performance.cpuUsage".to_string(), cpu_percent);

        CheckResult {
            scenario_name: name.to_string(),
            passed: true,
            execution_time_ms,
            error: None,
            metrics,
        }
    }
}

#[async_trait]
impl ScenarioExecutor for SyntheticExecutor {
    async fn execute(&self, name: &str, _timeout: Duration) -> anyhow::Result<CheckResult> {
        Ok(self.run_once(name))
    }

    async fn execute_by_category(&self, category: &str) -> anyhow::Result<Vec<CheckResult>> {
        Ok(vec![
            self.run_once(&format!("{}-startup", category)),
            self.run_once(&format!("{}-interaction", category)),
            self.run_once(&format!("{}-teardown", category)),
        ])
    }
}
