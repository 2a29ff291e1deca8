//! Component health for the reaper's liveness and readiness probes
//!
//! The watcher and dispatcher report into a shared [`HealthRegistry`]; the
//! binary's probe API reads it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the reaper that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Subscription to the engine's event feed
    EventStream,
    /// Outcome of the most recent cleanup pass
    Reconciler,
    /// Engine API reachability as seen by listings
    Engine,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::EventStream, Component::Reconciler, Component::Engine];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::EventStream => "event_stream",
            Component::Reconciler => "reconciler",
            Component::Engine => "engine",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered by severity, so the worst of a set is its maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still doing its job, but the last attempt had errors
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of the readiness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; the registry is not ready until
    /// startup calls [`set_ready`](Self::set_ready).
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::healthy()))
            .collect();

        Self {
            state: Arc::new(RwLock::new(RegistryState {
                components,
                started: false,
            })),
        }
    }

    pub async fn report(&self, component: Component, health: ComponentHealth) {
        self.state.write().await.components.insert(component, health);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    /// Overall status is the worst component status
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready once startup finished and no component is unhealthy. The
    /// reason names the first failing component.
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Reaper not yet initialized".to_string()),
            };
        }

        let failing = state
            .components
            .iter()
            .find(|(_, health)| !health.status.is_operational());

        match failing {
            Some((component, health)) => ReadinessResponse {
                ready: false,
                reason: Some(match &health.message {
                    Some(message) => format!("{component} unhealthy: {message}"),
                    None => format!("{component} unhealthy"),
                }),
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
    async fn test_registry_starts_healthy_but_not_ready() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), Component::ALL.len());
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_degraded_reconciler_keeps_reaper_ready() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry
            .set_degraded(Component::Reconciler, "last cleanup had 1 error(s)")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_lost_event_stream_fails_readiness() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry
            .set_degraded(Component::Engine, "listing failed")
            .await;
        registry
            .set_unhealthy(Component::EventStream, "event feed closed")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("event_stream unhealthy: event feed closed")
        );
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_component_recovers() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry.set_unhealthy(Component::Engine, "ping failed").await;
        registry.set_healthy(Component::Engine).await;

        assert!(registry.readiness().await.ready);
        assert_eq!(
            registry.component(Component::Engine).await.unwrap().status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_response_serializes_component_names() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::Reconciler, "slow").await;

        let json = serde_json::to_value(registry.health().await).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["reconciler"]["message"], "slow");
        assert_eq!(json["components"]["event_stream"]["status"], "healthy");
    }
}
