//! Container engine capability interface
//!
//! The reconciler and classifier only ever talk to the engine through these
//! traits. [`DockerEngine`] is the production implementation; the
//! [`testing`](crate::testing) module provides an in-memory one.

mod docker;

pub use docker::DockerEngine;

use crate::models::{
    ContainerEvent, ContainerSnapshot, NetworkResource, ServiceResource, VolumeResource,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

/// Live feed of container events
pub type EventStream = BoxStream<'static, Result<ContainerEvent, EngineError>>;

/// Errors surfaced by the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("engine API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Read-only container queries, the only capability the classifier needs
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Inspect a single container by id
    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, EngineError>;

    /// List all containers, including stopped ones
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, EngineError>;
}

/// Full capability set used by the watcher and the reconciler
#[async_trait]
pub trait ContainerEngine: ContainerInspector {
    /// Subscribe to the engine's event feed, scoped to container events
    fn subscribe_events(&self) -> EventStream;

    /// Stop a container, waiting at most `timeout` before the engine kills it
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    /// Force-remove a container
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    async fn list_networks(&self) -> Result<Vec<NetworkResource>, EngineError>;

    async fn remove_network(&self, id: &str) -> Result<(), EngineError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeResource>, EngineError>;

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError>;

    /// List swarm services; an engine outside swarm mode reports none
    async fn list_services(&self) -> Result<Vec<ServiceResource>, EngineError>;

    async fn remove_service(&self, id: &str) -> Result<(), EngineError>;
}
