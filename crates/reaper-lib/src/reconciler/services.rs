//! Swarm service cleanup

use super::{KindOutcome, Reconciler};
use crate::models::ResourceKind;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Remove services labelled with, or named after, the job id. Removal is
    /// the teardown; there is no stop step.
    pub(super) async fn clean_services(&self, job_id: &str) -> KindOutcome {
        let mut outcome = KindOutcome::new(ResourceKind::Service);

        let services = match self.engine.list_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "Failed to list services");
                outcome.list_error = Some(e.to_string());
                return outcome;
            }
        };

        for service in services {
            if self.classifier.identity_match(&service, job_id).is_none() {
                continue;
            }

            outcome.record_found(&service.id);
            match self.engine.remove_service(&service.id).await {
                Ok(()) => {
                    info!(service_id = %service.id, service_name = %service.name, "Removed service");
                    outcome.record_removed(&service.id);
                }
                Err(e) if e.is_not_found() => debug!(service_id = %service.id, "Service already gone"),
                Err(e) => {
                    warn!(service_id = %service.id, error = %e, "Failed to remove service");
                    outcome.record_failure(&service.id, e.to_string());
                }
            }
        }

        outcome
    }
}
