//! HTTP API for liveness, readiness and Prometheus metrics

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use reaper_lib::{health::HealthRegistry, observability::ReaperMetrics};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{info, warn};

const TEXT_PLAIN: [(&str, &str); 1] = [("content-type", "text/plain; charset=utf-8")];

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// 200 while every component is operational, 503 once one is unhealthy
async fn healthz(State(health): State<HealthRegistry>) -> impl IntoResponse {
    let response = health.health().await;
    (probe_status(response.status.is_operational()), Json(response))
}

async fn readyz(State(health): State<HealthRegistry>) -> impl IntoResponse {
    let response = health.readiness().await;
    (probe_status(response.ready), Json(response))
}

async fn metrics() -> impl IntoResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => (StatusCode::OK, TEXT_PLAIN, buffer),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, TEXT_PLAIN, e.to_string().into_bytes())
        }
    }
}

/// Probe router over the shared health registry
pub fn create_router(health: HealthRegistry) -> Router {
    // Register the reaper's collectors up front so /metrics lists them
    // before the first cleanup runs
    ReaperMetrics::new();

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(health)
}

/// Serve the probe API on all interfaces until shutdown is signalled
pub async fn serve(
    port: u16,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Probe API listening");

    axum::serve(listener, create_router(health))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
