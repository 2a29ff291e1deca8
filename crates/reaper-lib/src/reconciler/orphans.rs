//! Network and volume cleanup by set difference
//!
//! Networks and volumes rarely carry job labels, so instead of matching them
//! against the job id we remove whatever no listed container references.
//! Listing after the container step makes this idempotent and insensitive to
//! a concurrent compose teardown.

use super::{KindOutcome, Reconciler};
use crate::models::ResourceKind;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Networks the engine creates itself and refuses to remove
const PREDEFINED_NETWORKS: &[&str] = &["bridge", "host", "none", "ingress", "docker_gwbridge"];

impl Reconciler {
    /// Names referenced by every currently listed container, as picked by
    /// `refs`
    async fn referenced_names<F>(&self, outcome: &mut KindOutcome, refs: F) -> Option<HashSet<String>>
    where
        F: Fn(&crate::models::ContainerSnapshot) -> &[String],
    {
        match self.engine.list_containers().await {
            Ok(containers) => Some(
                containers
                    .iter()
                    .flat_map(|c| refs(c).iter().cloned())
                    .collect(),
            ),
            Err(e) => {
                warn!(kind = %outcome.kind, error = %e, "Failed to list containers for reference set");
                outcome.list_error = Some(e.to_string());
                None
            }
        }
    }

    pub(super) async fn clean_networks(&self) -> KindOutcome {
        let mut outcome = KindOutcome::new(ResourceKind::Network);

        let Some(referenced) = self
            .referenced_names(&mut outcome, |c| c.networks.as_slice())
            .await
        else {
            return outcome;
        };

        let networks = match self.engine.list_networks().await {
            Ok(networks) => networks,
            Err(e) => {
                warn!(error = %e, "Failed to list networks");
                outcome.list_error = Some(e.to_string());
                return outcome;
            }
        };

        for network in networks {
            if PREDEFINED_NETWORKS.contains(&network.name.as_str())
                || referenced.contains(&network.name)
                || !network.containers.is_empty()
            {
                continue;
            }

            outcome.record_found(&network.id);
            match self.engine.remove_network(&network.id).await {
                Ok(()) => {
                    info!(network_id = %network.id, network_name = %network.name, "Removed network");
                    outcome.record_removed(&network.id);
                }
                Err(e) if e.is_not_found() => {
                    debug!(network_id = %network.id, "Network already gone");
                }
                Err(e) => {
                    warn!(network_id = %network.id, error = %e, "Failed to remove network");
                    outcome.record_failure(&network.id, e.to_string());
                }
            }
        }

        outcome
    }

    pub(super) async fn clean_volumes(&self) -> KindOutcome {
        let mut outcome = KindOutcome::new(ResourceKind::Volume);

        let Some(referenced) = self
            .referenced_names(&mut outcome, |c| c.mounts.as_slice())
            .await
        else {
            return outcome;
        };

        let volumes = match self.engine.list_volumes().await {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(error = %e, "Failed to list volumes");
                outcome.list_error = Some(e.to_string());
                return outcome;
            }
        };

        for volume in volumes {
            if referenced.contains(&volume.name) {
                continue;
            }

            outcome.record_found(&volume.name);
            match self.engine.remove_volume(&volume.name).await {
                Ok(()) => {
                    info!(volume = %volume.name, "Removed volume");
                    outcome.record_removed(&volume.name);
                }
                Err(e) if e.is_not_found() => debug!(volume = %volume.name, "Volume already gone"),
                Err(e) => {
                    warn!(volume = %volume.name, error = %e, "Failed to remove volume");
                    outcome.record_failure(&volume.name, e.to_string());
                }
            }
        }

        outcome
    }
}
