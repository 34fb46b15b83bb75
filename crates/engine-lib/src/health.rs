//! Component health for the liveness and readiness endpoints
//!
//! The scheduler reports each subsystem's latest state into a shared
//! registry; the registry folds them into one overall status. Readiness is
//! additionally gated on the engine having started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names reported by the scheduler
pub mod components {
    pub const CHECK_RUNNER: &str = "check_runner";
    pub const ALERT_ENGINE: &str = "alert_engine";
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const SCHEDULER: &str = "scheduler";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded still serves traffic; only `Unhealthy` takes the probe down
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }

    /// The more severe of two statuses
    fn worst(self, other: ComponentStatus) -> ComponentStatus {
        use ComponentStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Latest report from one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn report(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }
}

/// Payload of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Payload of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    reports: HashMap<String, ComponentHealth>,
    started: bool,
}

/// Shared registry the scheduler reports into and the API reads from
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component; it starts healthy
    pub async fn register(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut inner = self.inner.write().await;
        inner
            .reports
            .insert(name.to_string(), ComponentHealth::report(status, message));
    }

    /// Flip the readiness gate; set on scheduler start, cleared on stop
    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        let status = inner
            .reports
            .values()
            .fold(ComponentStatus::Healthy, |acc, c| acc.worst(c.status));
        HealthResponse {
            status,
            components: inner.reports.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let inner = self.inner.read().await;
        if !inner.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("engine not started".to_string()),
            };
        }
        match inner
            .reports
            .iter()
            .find(|(_, report)| !report.status.is_operational())
        {
            Some((name, _)) => ReadinessResponse {
                ready: false,
                reason: Some(format!("component '{}' unhealthy", name)),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_registered_component_starts_healthy() {
        let registry = HealthRegistry::new();
        registry.register(components::CHECK_RUNNER).await;

        let health = registry.health().await;
        assert_eq!(
            health.components[components::CHECK_RUNNER].status,
            ComponentStatus::Healthy
        );
        assert!(health.components[components::CHECK_RUNNER].message.is_none());
    }

    #[tokio::test]
    async fn test_degraded_component_is_still_operational() {
        let registry = HealthRegistry::new();
        registry.register(components::CHECK_RUNNER).await;
        registry.register(components::ALERT_ENGINE).await;

        registry
            .set_degraded(components::ALERT_ENGINE, "alert actions failing")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
    }

    #[tokio::test]
    async fn test_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new();
        registry
            .set_degraded(components::ORCHESTRATOR, "queue not draining")
            .await;
        registry
            .set_unhealthy(components::CHECK_RUNNER, "target gone")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_recovery_clears_the_message() {
        let registry = HealthRegistry::new();
        registry
            .set_degraded(components::CHECK_RUNNER, "collaborator unreachable")
            .await;
        registry.set_healthy(components::CHECK_RUNNER).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components[components::CHECK_RUNNER].message.is_none());
    }

    #[tokio::test]
    async fn test_readiness_gated_on_start() {
        let registry = HealthRegistry::new();

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unhealthy_component_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::SCHEDULER, "stopped unexpectedly")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains(components::SCHEDULER));
    }
}
