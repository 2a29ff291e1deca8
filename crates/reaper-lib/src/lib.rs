//! Job reaper library
//!
//! This crate provides the core functionality for:
//! - Watching the container engine's event feed for finished CI jobs
//! - Classifying containers, networks, volumes and services as job resources
//! - Reconciling a finished job's resources away with bounded retries
//! - Delegating compose stack teardown to the compose tool
//! - Health checks and observability

pub mod classifier;
pub mod clock;
pub mod compose;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconciler;
pub mod testing;
pub mod watcher;

pub use classifier::{JobClassifier, JobPatterns};
pub use engine::{ContainerEngine, ContainerInspector, DockerEngine, EngineError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{ReaperMetrics, StructuredLogger};
pub use reconciler::{CleanupSummary, Reconciler, ReconcilerConfig};
pub use watcher::{CleanupDispatcher, WatchExit, Watcher};
