//! Cleanup reconciler
//!
//! Drives one reconciliation pass for a finished job: an optional delegated
//! compose teardown, then a bounded-retry convergence loop over containers,
//! followed by set-difference cleanup of networks and volumes and direct
//! removal of the job's swarm services. Every step re-lists from the engine;
//! nothing is carried between passes.

mod containers;
mod orphans;
mod services;
mod summary;


pub use summary::{CleanupSummary, KindOutcome, ResourceFailure, NOTHING_TO_CLEAN};

use crate::classifier::JobClassifier;
use crate::clock::{Clock, SystemClock};
use crate::compose::{is_externally_managed, ComposeBridge, ComposeConfig};
use crate::engine::ContainerEngine;
use crate::observability::{ReaperMetrics, StructuredLogger};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and retry bounds for a pass
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Wait before the first listing so in-flight shutdown hooks can finish
    pub pre_cleanup_delay: Duration,
    /// Wait between container convergence attempts
    pub poll_interval: Duration,
    /// Extra container attempts after the first
    pub max_retries: u32,
    /// Grace period handed to the engine when stopping a container
    pub stop_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pre_cleanup_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            max_retries: 3,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of a cleanup for one job id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Triggered,
    Converging,
    Done,
}

pub struct Reconciler {
    engine: Arc<dyn ContainerEngine>,
    classifier: JobClassifier,
    compose: ComposeBridge,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    metrics: ReaperMetrics,
    logger: StructuredLogger,
}

impl Reconciler {
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    pub fn classifier(&self) -> &JobClassifier {
        &self.classifier
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    fn transition(&self, job_id: &str, from: Phase, to: Phase) {
        debug!(job_id = %job_id, from = ?from, to = ?to, "Cleanup phase change");
    }

    /// Run one full reconciliation pass for `job_id`.
    ///
    /// All four resource kinds are always attempted; failures are recorded in
    /// the returned summary and logged, never propagated.
    pub async fn clean_up(&self, job_id: &str) -> CleanupSummary {
        let mut summary = CleanupSummary::new(job_id);

        if job_id.is_empty() {
            summary.skipped = true;
            self.logger.log_cleanup(&summary);
            return summary;
        }

        let started = Instant::now();
        self.transition(job_id, Phase::Idle, Phase::Triggered);
        info!(job_id = %job_id, "Starting cleanup");

        self.clock.sleep(self.config.pre_cleanup_delay).await;

        match self.engine.list_containers().await {
            Ok(containers) if is_externally_managed(&containers) => {
                summary.compose = Some(self.compose.tear_down(job_id).await);
            }
            Ok(_) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to list containers for compose check"),
        }

        self.transition(job_id, Phase::Triggered, Phase::Converging);
        summary.containers = self.converge_containers(job_id).await;
        summary.networks = self.clean_networks().await;
        summary.volumes = self.clean_volumes().await;
        summary.services = self.clean_services(job_id).await;

        summary.duration_ms = started.elapsed().as_millis() as u64;
        self.transition(job_id, Phase::Converging, Phase::Done);

        self.metrics.record_cleanup(&summary);
        self.logger.log_cleanup(&summary);
        summary
    }
}

/// Builder for the reconciler; only the engine is required
pub struct ReconcilerBuilder {
    engine: Option<Arc<dyn ContainerEngine>>,
    classifier: JobClassifier,
    compose: Option<ComposeBridge>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    logger: StructuredLogger,
}

impl ReconcilerBuilder {
    pub fn new() -> Self {
        Self {
            engine: None,
            classifier: JobClassifier::default(),
            compose: None,
            clock: Arc::new(SystemClock),
            config: ReconcilerConfig::default(),
            logger: StructuredLogger::new("unknown"),
        }
    }

    pub fn engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn classifier(mut self, classifier: JobClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn compose(mut self, compose: ComposeBridge) -> Self {
        self.compose = Some(compose);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Result<Reconciler> {
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Engine is required"))?;

        Ok(Reconciler {
            engine,
            classifier: self.classifier,
            compose: self
                .compose
                .unwrap_or_else(|| ComposeBridge::production(ComposeConfig::default())),
            clock: self.clock,
            config: self.config,
            metrics: ReaperMetrics::new(),
            logger: self.logger,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
