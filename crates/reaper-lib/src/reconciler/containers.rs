//! Container convergence loop

use super::{KindOutcome, Reconciler};
use crate::models::{ContainerSnapshot, ResourceKind};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Stop and remove the job's containers until none are left or the
    /// retry budget is spent.
    pub(super) async fn converge_containers(&self, job_id: &str) -> KindOutcome {
        let mut outcome = KindOutcome::new(ResourceKind::Container);
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempts = 0u32;

        loop {
            let targets = match self.attributable_containers(job_id).await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to list containers");
                    outcome.list_error = Some(e.to_string());
                    break;
                }
            };

            if targets.is_empty() {
                if attempts > 0 {
                    debug!(job_id = %job_id, attempts, "Job containers converged");
                }
                break;
            }

            if attempts >= max_attempts {
                outcome.still_active = targets.iter().map(|c| c.id.clone()).collect();
                warn!(
                    job_id = %job_id,
                    attempts,
                    still_active = ?outcome.still_active,
                    "Reconciliation failed, job containers still active"
                );
                break;
            }

            // Containers outlived an attempt; give the engine a poll interval
            if attempts > 0 {
                self.clock.sleep(self.config.poll_interval).await;
            }

            attempts += 1;
            debug!(job_id = %job_id, attempt = attempts, count = targets.len(), "Removing job containers");
            for container in &targets {
                outcome.record_found(&container.id);
                self.remove_container(container, &mut outcome).await;
            }
        }

        outcome
    }

    async fn attributable_containers(
        &self,
        job_id: &str,
    ) -> Result<Vec<ContainerSnapshot>, crate::engine::EngineError> {
        let containers = self.engine.list_containers().await?;
        let now = self.clock.now();

        Ok(containers
            .into_iter()
            .filter(|c| self.classifier.is_job_resource(c, job_id, now))
            .collect())
    }

    /// Stop (when running) then force-remove one container. A failed stop
    /// skips the remove until the next attempt.
    async fn remove_container(&self, container: &ContainerSnapshot, outcome: &mut KindOutcome) {
        let id = container.id.as_str();

        if container.state.is_running() {
            match self.engine.stop_container(id, self.config.stop_timeout).await {
                Ok(()) => debug!(container_id = %id, "Stopped container"),
                Err(e) if e.is_not_found() => {
                    debug!(container_id = %id, "Container already gone");
                    return;
                }
                Err(e) => {
                    warn!(container_id = %id, error = %e, "Failed to stop container");
                    outcome.record_failure(id, format!("stop failed: {}", e));
                    return;
                }
            }
        }

        match self.engine.remove_container(id).await {
            Ok(()) => {
                info!(container_id = %id, container_name = %container.name, "Removed container");
                outcome.record_removed(id);
            }
            Err(e) if e.is_not_found() => debug!(container_id = %id, "Container already gone"),
            Err(e) => {
                warn!(container_id = %id, error = %e, "Failed to remove container");
                outcome.record_failure(id, format!("remove failed: {}", e));
            }
        }
    }
}
