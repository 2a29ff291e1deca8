//! Job pattern matching against container names

use crate::engine::ContainerInspector;
use crate::models::ContainerSnapshot;
use regex::Regex;
use tracing::{debug, info, warn};

/// Test `name` against each pattern, compiling them on the fly.
///
/// Invalid patterns are logged and skipped. Returns on the first match;
/// an empty pattern list never matches.
pub fn matches(name: &str, patterns: &[String]) -> bool {
    for pattern in patterns {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(
                    container_name = %name,
                    pattern = %pattern,
                    error = %e,
                    "Failed to compile job pattern, skipping"
                );
                continue;
            }
        };

        if regex.is_match(name) {
            info!(container_name = %name, pattern = %pattern, "Container matched job pattern");
            return true;
        }
    }

    false
}

/// Job pattern set compiled once at startup and shared read-only
#[derive(Debug, Clone, Default)]
pub struct JobPatterns {
    compiled: Vec<Regex>,
}

impl JobPatterns {
    /// Compile `patterns`, dropping (and logging) any that fail to parse
    pub fn compile(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid job pattern");
                    None
                }
            })
            .collect();

        Self { compiled }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self.compiled.iter().find(|regex| regex.is_match(name)) {
            Some(regex) => {
                debug!(container_name = %name, pattern = %regex.as_str(), "Container matched job pattern");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Inspect `container_id` and return its snapshot if its name matches a job
/// pattern.
///
/// A container that no longer exists, or any other inspect failure, is
/// logged and treated as not matching.
pub async fn inspect_job_container<I>(
    inspector: &I,
    container_id: &str,
    patterns: &JobPatterns,
) -> Option<ContainerSnapshot>
where
    I: ContainerInspector + ?Sized,
{
    let snapshot = match inspector.inspect_container(container_id).await {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_not_found() => {
            debug!(container_id = %container_id, "Container not found");
            return None;
        }
        Err(e) => {
            warn!(container_id = %container_id, error = %e, "Failed to inspect container");
            return None;
        }
    };

    patterns.is_match(&snapshot.name).then_some(snapshot)
}

/// Whether the container's name matches any job pattern
pub async fn is_job_pattern<I>(inspector: &I, container_id: &str, patterns: &JobPatterns) -> bool
where
    I: ContainerInspector + ?Sized,
{
    inspect_job_container(inspector, container_id, patterns)
        .await
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{container, MockEngine};

    fn gitlab_patterns() -> Vec<String> {
        vec![
            "^/runner-.*-project-.*-concurrent-.*-.*-build$".to_string(),
            "^/runner-.*-project-.*-concurrent-.*-.*-test$".to_string(),
            "^/runner-.*-project-.*-concurrent-.*-.*-deploy$".to_string(),
        ]
    }

    #[test]
    fn test_matches_build_pattern() {
        assert!(matches(
            "/runner-123-project-456-concurrent-789-0-build",
            &gitlab_patterns()
        ));
        assert!(matches(
            "/runner-123-project-456-concurrent-789-0-test",
            &gitlab_patterns()
        ));
    }

    #[test]
    fn test_matches_no_match() {
        assert!(!matches(
            "/runner-123-project-456-concurrent-789-0-other",
            &gitlab_patterns()
        ));
    }

    #[test]
    fn test_matches_empty_patterns() {
        assert!(!matches("/runner-123-project-456-concurrent-789-0-build", &[]));
    }

    #[test]
    fn test_matches_skips_invalid_pattern() {
        let patterns = vec![
            "^(runner-.*-build$".to_string(),
            "^/runner-\\d+-build$".to_string(),
        ];
        assert!(matches("/runner-123-build", &patterns));

        let only_invalid = vec!["^(runner-.*-build$".to_string()];
        assert!(!matches("/runner-123-build", &only_invalid));
    }

    #[test]
    fn test_matches_escaped_classes() {
        let patterns = vec!["^/runner-\\d+-project-\\d+-concurrent-\\d+-\\d+-special$".to_string()];
        assert!(matches(
            "/runner-123-project-456-concurrent-789-0-special",
            &patterns
        ));
        assert!(!matches(
            "/runner-123-project-456-concurrent-789-0-build",
            &patterns
        ));
    }

    #[test]
    fn test_compiled_patterns_agree_with_matches() {
        let mut patterns = gitlab_patterns();
        patterns.push("[unclosed".to_string());
        let compiled = JobPatterns::compile(&patterns);

        assert_eq!(compiled.len(), 3);
        for name in [
            "/runner-1-project-2-concurrent-3-4-build",
            "/runner-1-project-2-concurrent-3-4-lint",
            "/postgres",
        ] {
            assert_eq!(compiled.is_match(name), matches(name, &patterns), "{name}");
        }
    }

    #[tokio::test]
    async fn test_is_job_pattern_inspects_container() {
        let engine = MockEngine::new();
        engine.add_container(container(
            "test-container-id",
            "/runner-123-project-456-concurrent-789-0-build",
        ));

        let patterns = JobPatterns::compile(&gitlab_patterns());
        assert!(is_job_pattern(&engine, "test-container-id", &patterns).await);
        assert_eq!(engine.inspect_calls(), vec!["test-container-id".to_string()]);
    }

    #[tokio::test]
    async fn test_is_job_pattern_missing_container() {
        let engine = MockEngine::new();
        let patterns = JobPatterns::compile(&gitlab_patterns());

        assert!(!is_job_pattern(&engine, "gone", &patterns).await);
    }
}
