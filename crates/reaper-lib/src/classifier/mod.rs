//! Job pattern classification
//!
//! Two questions are answered here: does a container's name match one of
//! the configured job patterns (the trigger), and does a given resource
//! belong to a particular job id (the cleanup scope).

mod heuristics;
mod patterns;

pub use heuristics::{
    has_compose_naming, has_compose_project, is_compose_container, Attributable,
    HeuristicConfig, JobClassifier, MatchReason, COMPOSE_PROJECT_LABEL, GITHUB_JOB_ID_LABEL,
    GITLAB_JOB_ID_LABEL,
};
pub use patterns::{inspect_job_container, is_job_pattern, matches, JobPatterns};
