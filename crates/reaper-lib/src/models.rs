//! Core data models for the job reaper

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a container as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Exited,
    /// Any other engine state (created, paused, restarting, dead, ...)
    Other(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            other => ContainerState::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// Point-in-time view of a container, fetched fresh on every pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    /// Engine-assigned display name, usually slash-prefixed
    pub name: String,
    pub labels: HashMap<String, String>,
    pub state: ContainerState,
    pub created: Option<DateTime<Utc>>,
    /// Names of the volumes mounted into the container
    pub mounts: Vec<String>,
    /// Names of the networks the container is attached to
    pub networks: Vec<String>,
}

impl ContainerSnapshot {
    /// Exited container with no labels, mounts or networks
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: HashMap::new(),
            state: ContainerState::Exited,
            created: None,
            mounts: Vec::new(),
            networks: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: ContainerState) -> Self {
        self.state = state;
        self
    }

    pub fn with_mount(mut self, volume: impl Into<String>) -> Self {
        self.mounts.push(volume.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }

    /// Container name with the engine's leading `/` removed
    pub fn trimmed_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResource {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Ids of containers the engine reports as attached
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeResource {
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResource {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Normalized container event from the engine feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// Container id the event refers to
    pub id: String,
    /// Engine action, e.g. `start` or `die`
    pub action: String,
    /// Raw event timestamp in nanoseconds, when the engine supplied one
    pub time_nano: Option<i64>,
    /// Actor attributes (container name and labels)
    pub attributes: HashMap<String, String>,
}

impl ContainerEvent {
    /// Whether this event signals that the container stopped running
    pub fn is_terminal(&self) -> bool {
        self.action == "die"
    }

    pub fn is_start(&self) -> bool {
        self.action == "start"
    }
}

/// The four resource kinds a reconciliation pass covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Network,
    Volume,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Container,
        ResourceKind::Network,
        ResourceKind::Volume,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Container => "container",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
