//! Cleanup dispatch with per-job exclusion
//!
//! Two passes for the same job id never overlap; passes for distinct job
//! ids share a bounded number of permits. With a single permit every pass
//! runs strictly one after another.

use crate::health::{Component, HealthRegistry};
use crate::reconciler::{CleanupSummary, Reconciler};
use dashmap::DashMap;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CleanupDispatcher {
    reconciler: Arc<Reconciler>,
    health: HealthRegistry,
    job_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<JoinSet<CleanupSummary>>>,
}

impl CleanupDispatcher {
    pub fn new(reconciler: Arc<Reconciler>, health: HealthRegistry, max_concurrent: usize) -> Self {
        Self {
            reconciler,
            health,
            job_locks: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Run a pass for `job_id` on the caller's task, waiting for any pass
    /// already running for the same job.
    pub async fn run(&self, job_id: &str) -> CleanupSummary {
        let lock = self
            .job_locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let summary = {
            let _job_guard = lock.lock().await;
            // Never closed, so acquire only fails on a bug
            let _permit = self.permits.acquire().await.ok();
            self.reconciler.clean_up(job_id).await
        };

        drop(lock);
        self.job_locks
            .remove_if(job_id, |_, lock| Arc::strong_count(lock) == 1);

        self.report_health(&summary).await;
        summary
    }

    /// Start a pass for `job_id` in the background
    pub async fn dispatch(&self, job_id: String) {
        let mut in_flight = self.in_flight.lock().await;

        // Reap finished passes so the set does not grow without bound
        while let Some(Some(finished)) = in_flight.join_next().now_or_never() {
            if let Err(e) = finished {
                warn!(error = %e, "Cleanup task failed");
            }
        }

        debug!(job_id = %job_id, in_flight = in_flight.len(), "Dispatching cleanup");
        let dispatcher = self.clone();
        in_flight.spawn(async move { dispatcher.run(&job_id).await });
    }

    /// Wait for every background pass still running and return their
    /// summaries in completion order
    pub async fn drain(&self) -> Vec<CleanupSummary> {
        let mut in_flight = self.in_flight.lock().await;
        let mut summaries = Vec::new();

        while let Some(finished) = in_flight.join_next().await {
            match finished {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(error = %e, "Cleanup task failed"),
            }
        }

        summaries
    }

    async fn report_health(&self, summary: &CleanupSummary) {
        if summary.skipped {
            return;
        }

        let list_error = summary
            .kinds()
            .into_iter()
            .find_map(|k| k.list_error.clone());
        match list_error {
            Some(error) => {
                self.health
                    .set_degraded(Component::Engine, format!("listing failed: {error}"))
                    .await
            }
            None => self.health.set_healthy(Component::Engine).await,
        }

        if summary.is_success() {
            self.health.set_healthy(Component::Reconciler).await;
        } else {
            self.health
                .set_degraded(
                    Component::Reconciler,
                    format!(
                        "last cleanup for job {} had {} error(s)",
                        summary.job_id,
                        summary.errors().len()
                    ),
                )
                .await;
        }
    }
}
