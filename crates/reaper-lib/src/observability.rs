//! Observability infrastructure for the job reaper
//!
//! Provides:
//! - Prometheus metrics (events seen, cleanups run, removals and failures per resource kind)
//! - Structured JSON logging of lifecycle and cleanup events with tracing

use crate::models::ResourceKind;
use crate::reconciler::{CleanupSummary, NOTHING_TO_CLEAN};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cleanup pass duration (in seconds)
const CLEANUP_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ReaperMetricsInner> = OnceLock::new();

struct ReaperMetricsInner {
    events_received: IntCounter,
    feed_errors: IntCounter,
    jobs_matched: IntCounter,
    cleanups: IntCounter,
    cleanup_duration_seconds: Histogram,
    resources_removed: IntCounterVec,
    removal_failures: IntCounterVec,
    convergence_failures: IntCounter,
    compose_teardowns: IntCounterVec,
}

impl ReaperMetricsInner {
    fn new() -> Self {
        Self {
            events_received: register_int_counter!(
                "job_reaper_events_received_total",
                "Container events received from the engine feed"
            )
            .expect("Failed to register events_received"),

            feed_errors: register_int_counter!(
                "job_reaper_feed_errors_total",
                "Engine event feed failures"
            )
            .expect("Failed to register feed_errors"),

            jobs_matched: register_int_counter!(
                "job_reaper_jobs_matched_total",
                "Terminal events for containers matching a job pattern"
            )
            .expect("Failed to register jobs_matched"),

            cleanups: register_int_counter!(
                "job_reaper_cleanups_total",
                "Reconciliation passes run"
            )
            .expect("Failed to register cleanups"),

            cleanup_duration_seconds: register_histogram!(
                "job_reaper_cleanup_duration_seconds",
                "Wall time of a reconciliation pass",
                CLEANUP_BUCKETS.to_vec()
            )
            .expect("Failed to register cleanup_duration_seconds"),

            resources_removed: register_int_counter_vec!(
                "job_reaper_resources_removed_total",
                "Resources removed, by kind",
                &["kind"]
            )
            .expect("Failed to register resources_removed"),

            removal_failures: register_int_counter_vec!(
                "job_reaper_removal_failures_total",
                "Failed stop or remove calls, by kind",
                &["kind"]
            )
            .expect("Failed to register removal_failures"),

            convergence_failures: register_int_counter!(
                "job_reaper_convergence_failures_total",
                "Passes that ended with job containers still active"
            )
            .expect("Failed to register convergence_failures"),

            compose_teardowns: register_int_counter_vec!(
                "job_reaper_compose_teardowns_total",
                "Delegated compose teardowns, by outcome",
                &["outcome"]
            )
            .expect("Failed to register compose_teardowns"),
        }
    }
}

/// Reaper metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ReaperMetrics {
    _private: (),
}

impl Default for ReaperMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaperMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ReaperMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ReaperMetricsInner {
        GLOBAL_METRICS.get_or_init(ReaperMetricsInner::new)
    }

    pub fn inc_events_received(&self) {
        self.inner().events_received.inc();
    }

    pub fn inc_feed_errors(&self) {
        self.inner().feed_errors.inc();
    }

    pub fn inc_jobs_matched(&self) {
        self.inner().jobs_matched.inc();
    }

    /// Record counters and duration for a finished pass
    pub fn record_cleanup(&self, summary: &CleanupSummary) {
        let inner = self.inner();
        inner.cleanups.inc();
        inner
            .cleanup_duration_seconds
            .observe(summary.duration_ms as f64 / 1000.0);

        for outcome in summary.kinds() {
            let kind = outcome.kind.as_str();
            inner
                .resources_removed
                .with_label_values(&[kind])
                .inc_by(outcome.removed.len() as u64);
            inner
                .removal_failures
                .with_label_values(&[kind])
                .inc_by(outcome.failures.len() as u64);
        }

        if !summary.converged() {
            inner.convergence_failures.inc();
        }

        if let Some(compose) = &summary.compose {
            let outcome = if compose.is_success() { "success" } else { "failure" };
            inner.compose_teardowns.with_label_values(&[outcome]).inc();
        }
    }

    pub fn resources_removed(&self, kind: ResourceKind) -> u64 {
        self.inner()
            .resources_removed
            .with_label_values(&[kind.as_str()])
            .get()
    }
}

/// Structured logger for reaper events
///
/// Emits fixed-shape JSON events for startup, shutdown, job detection and
/// cleanup results.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, pattern_count: usize) {
        info!(
            event = "reaper_started",
            node = %self.node_name,
            reaper_version = %version,
            job_patterns = pattern_count,
            "Job reaper started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "reaper_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Job reaper shutting down"
        );
    }

    pub fn log_job_started(&self, container_id: &str, container_name: &str) {
        info!(
            event = "job_started",
            node = %self.node_name,
            container_id = %container_id,
            container_name = %container_name,
            "Job container started"
        );
    }

    pub fn log_job_finished(&self, container_id: &str, container_name: &str, job_id: &str) {
        info!(
            event = "job_finished",
            node = %self.node_name,
            container_id = %container_id,
            container_name = %container_name,
            job_id = %job_id,
            "Job container finished"
        );
    }

    /// Log the outcome of a pass: nothing to clean, clean success, or the
    /// per-kind error list
    pub fn log_cleanup(&self, summary: &CleanupSummary) {
        if summary.skipped {
            info!(
                event = "cleanup_skipped",
                node = %self.node_name,
                "No job ID provided, skipping cleanup"
            );
            return;
        }

        if !summary.converged() {
            warn!(
                event = "convergence_failed",
                node = %self.node_name,
                job_id = %summary.job_id,
                still_active = ?summary.containers.still_active,
                "Job containers still active after retries"
            );
        }

        if summary.nothing_to_clean() {
            info!(
                event = "cleanup_completed",
                node = %self.node_name,
                job_id = %summary.job_id,
                duration_ms = summary.duration_ms,
                "{}",
                NOTHING_TO_CLEAN
            );
            return;
        }

        let errors = summary.errors();
        if errors.is_empty() {
            info!(
                event = "cleanup_completed",
                node = %self.node_name,
                job_id = %summary.job_id,
                containers_removed = summary.containers.removed.len(),
                networks_removed = summary.networks.removed.len(),
                volumes_removed = summary.volumes.removed.len(),
                services_removed = summary.services.removed.len(),
                duration_ms = summary.duration_ms,
                "Cleanup completed"
            );
        } else {
            warn!(
                event = "cleanup_completed",
                node = %self.node_name,
                job_id = %summary.job_id,
                removed = summary.removed_count(),
                errors = ?errors,
                duration_ms = summary.duration_ms,
                "Cleanup completed with errors"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaper_metrics_record_cleanup() {
        let metrics = ReaperMetrics::new();
        let before = metrics.resources_removed(ResourceKind::Volume);

        let mut summary = CleanupSummary::new("42");
        summary.volumes.record_found("cache");
        summary.volumes.record_removed("cache");
        metrics.record_cleanup(&summary);

        assert!(metrics.resources_removed(ResourceKind::Volume) >= before + 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
        logger.log_cleanup(&CleanupSummary::new("42"));
    }
}
