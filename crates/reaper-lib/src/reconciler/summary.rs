//! Outcome of a reconciliation pass

use crate::compose::ComposeOutcome;
use crate::models::ResourceKind;
use serde::Serialize;

pub const NOTHING_TO_CLEAN: &str = "no resources found to clean up";

/// A stop or remove call that failed for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub id: String,
    pub error: String,
}

/// What one per-kind step found and did
#[derive(Debug, Clone, Serialize)]
pub struct KindOutcome {
    pub kind: ResourceKind,
    /// Ids of the resources selected for removal
    pub found: Vec<String>,
    pub removed: Vec<String>,
    pub failures: Vec<ResourceFailure>,
    /// Attributable resources still present when retries ran out
    pub still_active: Vec<String>,
    /// Set when the step could not list its resources at all
    pub list_error: Option<String>,
}

impl KindOutcome {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            found: Vec::new(),
            removed: Vec::new(),
            failures: Vec::new(),
            still_active: Vec::new(),
            list_error: None,
        }
    }

    pub(crate) fn record_found(&mut self, id: &str) {
        if !self.found.iter().any(|f| f == id) {
            self.found.push(id.to_string());
        }
    }

    pub(crate) fn record_removed(&mut self, id: &str) {
        self.failures.retain(|f| f.id != id);
        if !self.removed.iter().any(|r| r == id) {
            self.removed.push(id.to_string());
        }
    }

    /// Record a failure, replacing any earlier one for the same resource
    pub(crate) fn record_failure(&mut self, id: &str, error: impl Into<String>) {
        self.failures.retain(|f| f.id != id);
        self.failures.push(ResourceFailure {
            id: id.to_string(),
            error: error.into(),
        });
    }

    /// Nothing matched and nothing went wrong
    pub fn nothing_found(&self) -> bool {
        self.found.is_empty() && self.list_error.is_none() && self.failures.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.list_error.is_none() && self.failures.is_empty() && self.still_active.is_empty()
    }

    /// Human-readable error lines for this kind
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(e) = &self.list_error {
            errors.push(format!("failed to list {}s: {}", self.kind, e));
        }
        for failure in &self.failures {
            errors.push(format!("{} {}: {}", self.kind, failure.id, failure.error));
        }
        if !self.still_active.is_empty() {
            errors.push(format!(
                "{}s still active after retries: {}",
                self.kind,
                self.still_active.join(", ")
            ));
        }
        errors
    }
}

/// Aggregated result of one reconciliation pass for a job id
#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub job_id: String,
    /// The pass did not run (empty job id)
    pub skipped: bool,
    pub compose: Option<ComposeOutcome>,
    pub containers: KindOutcome,
    pub networks: KindOutcome,
    pub volumes: KindOutcome,
    pub services: KindOutcome,
    pub duration_ms: u64,
}

impl CleanupSummary {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            skipped: false,
            compose: None,
            containers: KindOutcome::new(ResourceKind::Container),
            networks: KindOutcome::new(ResourceKind::Network),
            volumes: KindOutcome::new(ResourceKind::Volume),
            services: KindOutcome::new(ResourceKind::Service),
            duration_ms: 0,
        }
    }

    pub fn kinds(&self) -> [&KindOutcome; 4] {
        [&self.containers, &self.networks, &self.volumes, &self.services]
    }

    pub fn kind(&self, kind: ResourceKind) -> &KindOutcome {
        match kind {
            ResourceKind::Container => &self.containers,
            ResourceKind::Network => &self.networks,
            ResourceKind::Volume => &self.volumes,
            ResourceKind::Service => &self.services,
        }
    }

    /// True when every kind found nothing to remove and nothing failed
    pub fn nothing_to_clean(&self) -> bool {
        !self.skipped && self.kinds().iter().all(|k| k.nothing_found())
    }

    pub fn converged(&self) -> bool {
        self.containers.still_active.is_empty()
    }

    pub fn removed_count(&self) -> usize {
        self.kinds().iter().map(|k| k.removed.len()).sum()
    }

    /// Per-kind error list, compose teardown failure first
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match &self.compose {
            Some(ComposeOutcome::Failed { exit_code }) => {
                errors.push(format!("compose teardown exited with {:?}", exit_code))
            }
            Some(ComposeOutcome::SpawnFailed { error }) => {
                errors.push(format!("compose teardown could not run: {}", error))
            }
            _ => {}
        }
        errors.extend(self.kinds().iter().flat_map(|k| k.errors()));
        errors
    }

    pub fn is_success(&self) -> bool {
        self.errors().is_empty()
    }
}
