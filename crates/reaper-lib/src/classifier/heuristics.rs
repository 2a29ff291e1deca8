//! Attribution heuristics: does a resource belong to a given job?

use crate::models::{ContainerSnapshot, NetworkResource, ServiceResource, VolumeResource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Label GitHub runners put on job containers
pub const GITHUB_JOB_ID_LABEL: &str = "com.github.ci.job.id";

/// Label GitLab runners put on job containers
pub const GITLAB_JOB_ID_LABEL: &str = "com.gitlab.gitlab-runner.job.id";

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Why a resource was attributed to a job, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    JobLabel,
    ExactName,
    NameContains,
    ComposeLabel,
    ComposeNaming,
    RecentlyCreated,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MatchReason::JobLabel => "job-id label",
            MatchReason::ExactName => "exact name",
            MatchReason::NameContains => "name contains job id",
            MatchReason::ComposeLabel => "compose label",
            MatchReason::ComposeNaming => "compose naming convention",
            MatchReason::RecentlyCreated => "recently created",
        };
        f.write_str(reason)
    }
}

/// Anything the classifier can attribute to a job
pub trait Attributable {
    fn name(&self) -> &str;

    fn labels(&self) -> &HashMap<String, String>;

    fn created(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl Attributable for ContainerSnapshot {
    fn name(&self) -> &str {
        self.trimmed_name()
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl Attributable for NetworkResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

impl Attributable for VolumeResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

impl Attributable for ServiceResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

/// Tunables for the attribution heuristics
#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    /// Label keys that carry a CI job id
    pub job_id_labels: Vec<String>,
    /// Treat compose-labelled or compose-named resources as attributable
    pub compose_markers: bool,
    /// Treat resources created this recently as attributable (off when `None`)
    pub recency_window: Option<Duration>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            job_id_labels: vec![
                GITHUB_JOB_ID_LABEL.to_string(),
                GITLAB_JOB_ID_LABEL.to_string(),
            ],
            compose_markers: true,
            recency_window: None,
        }
    }
}

/// Decides whether resources belong to a given job id
#[derive(Debug, Clone, Default)]
pub struct JobClassifier {
    config: HeuristicConfig,
}

impl JobClassifier {
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    /// Correlation key for a job container: its job-id label when present,
    /// otherwise its trimmed name.
    pub fn job_id_for(&self, labels: &HashMap<String, String>, name: &str) -> String {
        self.job_label(labels)
            .map(str::to_string)
            .unwrap_or_else(|| name.trim_start_matches('/').to_string())
    }

    fn job_label<'a>(&self, labels: &'a HashMap<String, String>) -> Option<&'a str> {
        self.config
            .job_id_labels
            .iter()
            .filter_map(|key| labels.get(key))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    /// Match on job identity only: job-id label, exact name, name substring
    pub fn identity_match<R>(&self, resource: &R, job_id: &str) -> Option<MatchReason>
    where
        R: Attributable + ?Sized,
    {
        if job_id.is_empty() {
            return None;
        }

        let labels = resource.labels();
        if self
            .config
            .job_id_labels
            .iter()
            .any(|key| labels.get(key).map(String::as_str) == Some(job_id))
        {
            return Some(MatchReason::JobLabel);
        }

        let name = resource.name().trim_start_matches('/');
        if name == job_id {
            return Some(MatchReason::ExactName);
        }
        if name.contains(job_id) {
            return Some(MatchReason::NameContains);
        }

        None
    }

    /// Full heuristic set, returning the highest-precedence reason that holds
    pub fn classify<R>(&self, resource: &R, job_id: &str, now: DateTime<Utc>) -> Option<MatchReason>
    where
        R: Attributable + ?Sized,
    {
        let reason = self
            .identity_match(resource, job_id)
            .or_else(|| self.structural_match(resource, now));

        if let Some(reason) = reason {
            debug!(
                resource = %resource.name(),
                job_id = %job_id,
                reason = %reason,
                "Resource attributed to job"
            );
        }

        reason
    }

    pub fn is_job_resource<R>(&self, resource: &R, job_id: &str, now: DateTime<Utc>) -> bool
    where
        R: Attributable + ?Sized,
    {
        self.classify(resource, job_id, now).is_some()
    }

    fn structural_match<R>(&self, resource: &R, now: DateTime<Utc>) -> Option<MatchReason>
    where
        R: Attributable + ?Sized,
    {
        if self.config.compose_markers {
            if is_compose_container(resource.labels()) {
                return Some(MatchReason::ComposeLabel);
            }
            if has_compose_naming(resource.name()) {
                return Some(MatchReason::ComposeNaming);
            }
        }

        let window = self.config.recency_window?;
        let created = resource.created()?;
        let window = chrono::Duration::from_std(window).ok()?;
        // A creation time ahead of `now` is clock skew, not recency
        let age = now.signed_duration_since(created);
        (age >= chrono::Duration::zero() && age <= window).then_some(MatchReason::RecentlyCreated)
    }
}

/// Whether the labels mark a compose project or service member
pub fn is_compose_container(labels: &HashMap<String, String>) -> bool {
    labels
        .keys()
        .any(|key| key.ends_with("compose.project") || key.ends_with("compose.service"))
}

/// Whether the labels mark a compose project member
pub fn has_compose_project(labels: &HashMap<String, String>) -> bool {
    labels.keys().any(|key| key.ends_with("compose.project"))
}

/// Compose names containers `<project><sep><service><sep><index>` with `_`
/// (v1) or `-` (v2) as separator.
pub fn has_compose_naming(name: &str) -> bool {
    let name = name.trim_start_matches('/');

    ['_', '-'].iter().any(|sep| {
        let parts: Vec<&str> = name.split(*sep).collect();
        parts.len() >= 3
            && parts.iter().all(|part| !part.is_empty())
            && parts
                .last()
                .is_some_and(|index| index.chars().all(|c| c.is_ascii_digit()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::container;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_job_label_wins_regardless_of_name() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/postgres").with_label(GITHUB_JOB_ID_LABEL, "4242");

        assert_eq!(
            classifier.classify(&c, "4242", now()),
            Some(MatchReason::JobLabel)
        );
    }

    #[test]
    fn test_gitlab_label_recognized() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/postgres").with_label(GITLAB_JOB_ID_LABEL, "99");

        assert!(classifier.is_job_resource(&c, "99", now()));
        assert!(!classifier.is_job_resource(&c, "100", now()));
    }

    #[test]
    fn test_exact_trimmed_name() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/runner-123-build");

        assert_eq!(
            classifier.classify(&c, "runner-123-build", now()),
            Some(MatchReason::ExactName)
        );
    }

    #[test]
    fn test_name_substring() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/runner-123-build-predefined");

        assert_eq!(
            classifier.classify(&c, "runner-123-build", now()),
            Some(MatchReason::NameContains)
        );
    }

    #[test]
    fn test_empty_job_id_never_identity_matches() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/postgres");

        assert_eq!(classifier.identity_match(&c, ""), None);
        assert!(!classifier.is_job_resource(&c, "", now()));
    }

    #[test]
    fn test_compose_label_without_job_id() {
        let classifier = JobClassifier::default();
        let c = container("c1", "/web").with_label("compose.project", "example");

        assert!(is_compose_container(&c.labels));
        assert_eq!(
            classifier.classify(&c, "4242", now()),
            Some(MatchReason::ComposeLabel)
        );
    }

    #[test]
    fn test_compose_markers_can_be_disabled() {
        let classifier = JobClassifier::new(HeuristicConfig {
            compose_markers: false,
            ..Default::default()
        });
        let c = container("c1", "/example_web_1").with_label(COMPOSE_PROJECT_LABEL, "example");

        assert!(!classifier.is_job_resource(&c, "4242", now()));
    }

    #[test]
    fn test_compose_naming() {
        assert!(has_compose_naming("/example_web_1"));
        assert!(has_compose_naming("example-db-12"));
        assert!(!has_compose_naming("/runner-123-build"));
        assert!(!has_compose_naming("/web_1"));
        assert!(!has_compose_naming("/example__1"));
        assert!(!has_compose_naming("/postgres"));
    }

    #[test]
    fn test_recency_disabled_by_default() {
        let classifier = JobClassifier::default();
        let mut c = container("c1", "/postgres");
        c.created = Some(now());

        assert!(!classifier.is_job_resource(&c, "4242", now()));
    }

    #[test]
    fn test_recency_window() {
        let classifier = JobClassifier::new(HeuristicConfig {
            recency_window: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let mut fresh = container("c1", "/postgres");
        fresh.created = Some(now() - chrono::Duration::seconds(30));
        assert_eq!(
            classifier.classify(&fresh, "4242", now()),
            Some(MatchReason::RecentlyCreated)
        );

        let mut stale = container("c2", "/redis");
        stale.created = Some(now() - chrono::Duration::seconds(600));
        assert!(!classifier.is_job_resource(&stale, "4242", now()));
    }

    #[test]
    fn test_recency_ignores_future_creation_time() {
        let classifier = JobClassifier::new(HeuristicConfig {
            recency_window: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let mut skewed = container("c1", "/postgres");
        skewed.created = Some(now() + chrono::Duration::hours(2));
        assert_eq!(classifier.classify(&skewed, "4242", now()), None);

        let mut just_created = container("c2", "/redis");
        just_created.created = Some(now());
        assert_eq!(
            classifier.classify(&just_created, "4242", now()),
            Some(MatchReason::RecentlyCreated)
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = JobClassifier::default();
        let a = container("a", "/runner-1-build").with_label(GITHUB_JOB_ID_LABEL, "1");
        let b = container("b", "/postgres");

        let first: Vec<_> = [&a, &b]
            .iter()
            .map(|c| classifier.classify(*c, "1", now()))
            .collect();
        let second: Vec<_> = [&b, &a]
            .iter()
            .rev()
            .map(|c| classifier.classify(*c, "1", now()))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_job_id_for_prefers_label() {
        let classifier = JobClassifier::default();
        let labels = HashMap::from([(GITHUB_JOB_ID_LABEL.to_string(), "77".to_string())]);

        assert_eq!(classifier.job_id_for(&labels, "/runner-1-build"), "77");
        assert_eq!(
            classifier.job_id_for(&HashMap::new(), "/runner-1-build"),
            "runner-1-build"
        );
    }

    #[test]
    fn test_service_identity_match() {
        let classifier = JobClassifier::default();
        let service = ServiceResource {
            id: "svc1".to_string(),
            name: "job-4242-web".to_string(),
            labels: HashMap::new(),
        };

        assert_eq!(
            classifier.identity_match(&service, "4242"),
            Some(MatchReason::NameContains)
        );
    }
}
