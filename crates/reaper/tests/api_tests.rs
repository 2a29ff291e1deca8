//! Integration tests for the reaper's probe API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use job_reaper::api::create_router;
use reaper_lib::{
    classifier::GITHUB_JOB_ID_LABEL,
    health::{Component, HealthRegistry},
    reconciler::{Reconciler, ReconcilerConfig},
    testing::{container, ManualClock, MockEngine},
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Issue a GET against a fresh router over `health`
async fn get(health: &HealthRegistry, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(health.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let health = HealthRegistry::new();

    let (status, body) = get(&health, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["components"]["event_stream"].is_object());
    assert!(body["components"]["reconciler"].is_object());
    assert!(body["components"]["engine"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_reconciler_degraded() {
    let health = HealthRegistry::new();
    health
        .set_degraded(Component::Reconciler, "last cleanup for job 42 had 1 error(s)")
        .await;

    let (status, body) = get(&health, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(
        body["components"]["reconciler"]["message"],
        "last cleanup for job 42 had 1 error(s)"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_event_stream_lost() {
    let health = HealthRegistry::new();
    health
        .set_unhealthy(Component::EventStream, "event feed closed")
        .await;

    let (status, body) = get(&health, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_startup_completes() {
    let health = HealthRegistry::new();

    let (status, body) = get(&health, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let health = HealthRegistry::new();
    health.set_ready(true).await;

    let (status, body) = get(&health, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert!(body.get("reason").is_none());
}

#[tokio::test]
async fn test_readyz_names_unhealthy_component() {
    let health = HealthRegistry::new();
    health.set_ready(true).await;
    health
        .set_unhealthy(Component::EventStream, "event feed failed")
        .await;

    let (status, body) = get(&health, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "event_stream unhealthy: event feed failed");
}

#[tokio::test]
async fn test_metrics_endpoint_reports_cleanups() {
    let engine = MockEngine::new();
    engine.add_container(container("c1", "/runner-1-build").with_label(GITHUB_JOB_ID_LABEL, "1"));
    let reconciler = Reconciler::builder()
        .engine(Arc::new(engine.clone()))
        .clock(Arc::new(ManualClock::default()))
        .config(ReconcilerConfig {
            pre_cleanup_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ..Default::default()
        })
        .build()
        .unwrap();
    let summary = reconciler.clean_up("1").await;
    assert_eq!(summary.removed_count(), 1);

    let response = create_router(HealthRegistry::new())
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("job_reaper_cleanups_total"));
    assert!(metrics_text.contains("job_reaper_resources_removed_total{kind=\"container\"}"));
    assert!(metrics_text.contains("job_reaper_cleanup_duration_seconds_bucket"));
    assert!(metrics_text.contains("job_reaper_cleanup_duration_seconds_count"));
}
