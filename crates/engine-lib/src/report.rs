//! Report generation seam
//!
//! The rendering pipeline is an external collaborator; the engine only hands
//! it the session's results and alerts and records the returned summary.

use crate::models::{Alert, CheckResult, Severity};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use async_trait::async_trait;

/// Options controlling what a generated report covers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    /// Output formats requested from the renderer (opaque to the engine)
    #[serde(default)]
    pub formats: Vec<String>,
    /// Minimum alert severity included in the report
    pub min_severity: Severity,
    #[serde(default)]
    pub include_recommendations: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            formats: vec!["json".to_string()],
            min_severity: Severity::Warning,
            include_recommendations: true,
        }
    }
}

/// Summary returned by the report collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub report_id: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Trait for report generation implementations
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(
        &self,
        session_id: &str,
        results: &[CheckResult],
        alerts: &[Alert],
        options: &ReportOptions,
    ) -> Result<ReportSummary>;
}

/// Generator that logs a summary instead of rendering anything
///
/// Default collaborator for deployments without a rendering pipeline.
#[derive(Debug, Default)]
pub struct LogReportGenerator;

#[async_trait]
impl ReportGenerator for LogReportGenerator {
    async fn generate(
        &self,
        session_id: &str,
        results: &[CheckResult],
        alerts: &[Alert],
        options: &ReportOptions,
    ) -> Result<ReportSummary> {
        let report_id = crate::models::generate_id("report");
        let relevant_alerts = alerts
            .iter()
            .filter(|a| a.severity >= options.min_severity)
            .count();

        info!(
            report_id = %report_id,
            session_id = %session_id,
            results = results.len(),
            alerts = relevant_alerts,
            "Report generated"
        );

        Ok(ReportSummary {
            report_id,
            recommendations: Vec::new(),
        })
    }
}
