//! Health tracking for the exporter's samplers
//!
//! Every sampler is a component. The scheduler records each tick's
//! [`SampleOutcome`] here and the HTTP layer serves the aggregate.

use crate::error::SampleOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still producing observations, some of them stale
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Map one sampler outcome onto a health entry
    pub fn from_outcome(outcome: &SampleOutcome) -> Self {
        match outcome {
            SampleOutcome::Collected(report) if report.is_clean() => Self::healthy(),
            SampleOutcome::Collected(report) => {
                let items: Vec<&str> = report
                    .failures
                    .iter()
                    .map(|failure| failure.item.as_str())
                    .collect();
                Self::degraded(format!("stale items: {}", items.join(", ")))
            }
            SampleOutcome::Skipped { reason } => Self::degraded(reason.clone()),
            SampleOutcome::Failed(e) => Self::unhealthy(e.to_string()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names, one per sampler
pub mod components {
    pub const HOST: &str = "host";
    pub const PROCESSES: &str = "processes";
    pub const COMPOSE: &str = "compose_status";
    pub const CONTAINERS: &str = "containers";

    /// Components whose failure makes the exporter not ready.
    /// Container samplers are excluded so a stopped daemon never fails readiness.
    pub const CRITICAL: &[&str] = &[HOST];
}

/// Shared registry of component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record the outcome of a sampler run
    pub async fn record_outcome(&self, name: &str, outcome: &SampleOutcome) {
        self.update(name, ComponentHealth::from_outcome(outcome)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the first tick finished and no critical component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let entries = self.components.read().await;

        let failed_critical = components::CRITICAL.iter().find(|name| {
            entries
                .get(**name)
                .map(|health| health.status == ComponentStatus::Unhealthy)
                .unwrap_or(false)
        });

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("First collection tick has not completed".to_string()),
            }
        } else if let Some(name) = failed_critical {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Critical component {name} unhealthy")),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectError, SampleReport};

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_component_degrades_overall() {
        let registry = HealthRegistry::new();
        registry.register(components::HOST).await;
        registry.register(components::PROCESSES).await;

        registry.set_degraded(components::HOST, "stale items: disk:/data").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[test]
    fn test_outcome_mapping() {
        let clean = SampleOutcome::Collected(SampleReport::default());
        assert_eq!(
            ComponentHealth::from_outcome(&clean).status,
            ComponentStatus::Healthy
        );

        let mut report = SampleReport::default();
        report.fail("disk:/data", CollectError::parse("statvfs", "bad"));
        let partial = SampleOutcome::Collected(report);
        let health = ComponentHealth::from_outcome(&partial);
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.message.as_deref(), Some("stale items: disk:/data"));

        let skipped = SampleOutcome::skipped("container runtime unreachable");
        assert_eq!(
            ComponentHealth::from_outcome(&skipped).status,
            ComponentStatus::Degraded
        );

        let failed = SampleOutcome::Failed(CollectError::unavailable("docker daemon", "gone"));
        assert_eq!(
            ComponentHealth::from_outcome(&failed).status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_container_failure_keeps_readiness() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry.set_unhealthy(components::COMPOSE, "daemon down").await;

        assert!(registry.readiness().await.ready);
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_host_failure_fails_readiness() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry.set_unhealthy(components::HOST, "procfs missing").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Critical component host unhealthy")
        );
    }
}
