//! Event-driven job watcher
//!
//! Drains the engine's container event feed, classifies each lifecycle
//! event against the job patterns and hands terminal events for job
//! containers to the [`CleanupDispatcher`].

mod dispatch;
mod stream;

pub use dispatch::CleanupDispatcher;
pub use stream::{EventStreamConsumer, EventSubscription};

use crate::classifier::{inspect_job_container, JobPatterns};
use crate::engine::EngineError;
use crate::health::{Component, HealthRegistry};
use crate::models::ContainerEvent;
use crate::observability::{ReaperMetrics, StructuredLogger};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why the watch loop returned
#[derive(Debug)]
pub enum WatchExit {
    /// Shutdown was requested
    Shutdown,
    /// The feed closed without an error
    FeedEnded,
    /// The feed failed; the subscription is not reopened
    FeedError(EngineError),
}

pub struct Watcher {
    patterns: JobPatterns,
    dispatcher: CleanupDispatcher,
    health: HealthRegistry,
    metrics: ReaperMetrics,
    logger: StructuredLogger,
}

impl Watcher {
    pub fn new(
        patterns: JobPatterns,
        dispatcher: CleanupDispatcher,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            patterns,
            dispatcher,
            health,
            metrics: ReaperMetrics::new(),
            logger,
        }
    }

    pub fn dispatcher(&self) -> &CleanupDispatcher {
        &self.dispatcher
    }

    /// Subscribe to the feed and process events until shutdown or feed loss
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> WatchExit {
        let engine = self.dispatcher.reconciler().engine().clone();
        let mut subscription = EventStreamConsumer::subscribe(engine.as_ref());

        self.health.set_healthy(Component::EventStream).await;
        info!(patterns = self.patterns.len(), "Watching container events");

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break WatchExit::Shutdown,

                event = subscription.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        break match subscription.errors.recv().await {
                            Some(e) => WatchExit::FeedError(e),
                            None => WatchExit::FeedEnded,
                        };
                    }
                },

                Some(e) = subscription.errors.recv() => break WatchExit::FeedError(e),
            }
        };

        match &exit {
            WatchExit::FeedError(e) => {
                self.metrics.inc_feed_errors();
                self.health
                    .set_unhealthy(Component::EventStream, format!("event feed failed: {e}"))
                    .await;
            }
            WatchExit::FeedEnded => {
                self.health
                    .set_unhealthy(Component::EventStream, "event feed closed")
                    .await;
            }
            WatchExit::Shutdown => debug!("Watch loop stopped for shutdown"),
        }

        exit
    }

    /// Classify one event and dispatch a cleanup when a job container dies
    pub async fn handle_event(&self, event: ContainerEvent) {
        self.metrics.inc_events_received();

        if event.id.is_empty() || !(event.is_start() || event.is_terminal()) {
            return;
        }

        let engine = self.dispatcher.reconciler().engine();
        let Some(snapshot) = inspect_job_container(engine.as_ref(), &event.id, &self.patterns).await
        else {
            debug!(container_id = %event.id, action = %event.action, "Ignoring non-job container");
            return;
        };

        if event.is_start() {
            self.logger.log_job_started(&snapshot.id, &snapshot.name);
            return;
        }

        self.metrics.inc_jobs_matched();
        let job_id = self
            .dispatcher
            .reconciler()
            .classifier()
            .job_id_for(&snapshot.labels, &snapshot.name);
        self.logger
            .log_job_finished(&snapshot.id, &snapshot.name, &job_id);

        if job_id.is_empty() {
            warn!(container_id = %snapshot.id, "Job container has no usable job ID");
        }
        self.dispatcher.dispatch(job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::GITHUB_JOB_ID_LABEL;
    use crate::health::ComponentStatus;
    use crate::models::ContainerState;
    use crate::reconciler::{Reconciler, ReconcilerConfig};
    use crate::testing::{container, event, volume, EngineCall, ManualClock, MockEngine};
    use std::sync::Arc;
    use std::time::Duration;

    fn watcher(engine: &MockEngine, patterns: &[&str]) -> Watcher {
        let reconciler = Reconciler::builder()
            .engine(Arc::new(engine.clone()))
            .clock(Arc::new(ManualClock::default()))
            .config(ReconcilerConfig {
                pre_cleanup_delay: Duration::ZERO,
                poll_interval: Duration::ZERO,
                max_retries: 1,
                stop_timeout: Duration::from_secs(1),
            })
            .build()
            .unwrap();
        let health = HealthRegistry::new();
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();

        Watcher::new(
            JobPatterns::compile(&patterns),
            CleanupDispatcher::new(Arc::new(reconciler), health.clone(), 1),
            health,
            StructuredLogger::new("test-node"),
        )
    }

    #[tokio::test]
    async fn test_die_event_for_job_container_triggers_cleanup() {
        let engine = MockEngine::new();
        engine.add_container(
            container("c1", "/runner-123-build").with_state(ContainerState::Running),
        );
        engine.push_event(event("c1", "die"));
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        let (_tx, rx) = broadcast::channel(1);
        let exit = watcher.run(rx).await;
        let summaries = watcher.dispatcher().drain().await;

        assert!(matches!(exit, WatchExit::FeedEnded));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].job_id, "runner-123-build");
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Stop("c1".to_string()),
                EngineCall::RemoveContainer("c1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_job_id_label_takes_precedence_over_name() {
        let engine = MockEngine::new();
        engine.add_container(
            container("c1", "/runner-5-build").with_label(GITHUB_JOB_ID_LABEL, "5"),
        );
        engine.add_container(container("sidecar", "/postgres").with_label(GITHUB_JOB_ID_LABEL, "5"));
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        watcher.handle_event(event("c1", "die")).await;
        let summaries = watcher.dispatcher().drain().await;

        assert_eq!(summaries[0].job_id, "5");
        assert!(engine.container_ids().is_empty());
    }

    #[tokio::test]
    async fn test_start_event_only_logs() {
        let engine = MockEngine::new();
        engine.add_container(container("c1", "/runner-1-build"));
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        watcher.handle_event(event("c1", "start")).await;

        assert!(watcher.dispatcher().drain().await.is_empty());
        assert_eq!(engine.inspect_calls(), vec!["c1".to_string()]);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_matching_container_is_ignored() {
        let engine = MockEngine::new();
        engine.add_container(container("c1", "/nginx"));
        engine.add_volume(volume("orphan-data"));
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        watcher.handle_event(event("c1", "die")).await;

        assert!(watcher.dispatcher().drain().await.is_empty());
        assert_eq!(engine.volume_names(), vec!["orphan-data".to_string()]);
    }

    #[tokio::test]
    async fn test_other_actions_skip_inspection() {
        let engine = MockEngine::new();
        engine.add_container(container("c1", "/runner-1-build"));
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        watcher.handle_event(event("c1", "attach")).await;
        watcher.handle_event(event("", "die")).await;

        assert!(engine.inspect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_container_is_ignored() {
        let engine = MockEngine::new();
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        watcher.handle_event(event("gone", "die")).await;

        assert!(watcher.dispatcher().drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_feed_error_ends_watch_and_marks_unhealthy() {
        let engine = MockEngine::new();
        engine.push_feed_error("connection reset");
        let watcher = watcher(&engine, &["^/runner-.*-build$"]);

        let (_tx, rx) = broadcast::channel(1);
        let exit = watcher.run(rx).await;

        assert!(matches!(exit, WatchExit::FeedError(_)));
        let health = watcher.health.health().await;
        assert_eq!(
            health.components[&Component::EventStream].status,
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_watch() {
        let engine = MockEngine::new();
        let watcher = watcher(&engine, &[]);

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        let exit = watcher.run(rx).await;

        assert!(matches!(exit, WatchExit::Shutdown));
    }
}
