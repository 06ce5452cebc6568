//! HTTP health endpoint.
//!
//! `GET /health` always answers 200: connectivity problems are reported in
//! the payload, never as transport-level failures, so external probes can
//! tell "daemon down" apart from "tunnel down".

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use hatunnel_core::HealthReceiver;

/// Shared state for the health routes.
#[derive(Clone)]
pub struct AppState {
    /// Snapshot channel written by the tunnel supervisor.
    pub tunnel: HealthReceiver,
    /// Whether the local forwarding side of the daemon is up.
    pub proxy_up: watch::Receiver<bool>,
    /// Config passthrough, surfaced for the Google integration.
    pub report_state_enabled: bool,
}

/// Payload of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthPayload {
    pub status: &'static str,
    pub tunnel_connected: bool,
    pub proxy_running: bool,
    pub report_state_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<String>,
}

/// Build the HTTP router serving the banner and health routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> &'static str {
    concat!("hatunnel ", env!("CARGO_PKG_VERSION"), "\n")
}

async fn health(State(state): State<AppState>) -> Json<HealthPayload> {
    let snapshot = state.tunnel.borrow().clone();
    let proxy_running = *state.proxy_up.borrow();
    let status = if snapshot.connected && proxy_running { "ok" } else { "degraded" };

    Json(HealthPayload {
        status,
        tunnel_connected: snapshot.connected,
        proxy_running,
        report_state_enabled: state.report_state_enabled,
        last_error: snapshot.last_error,
        last_connected_at: snapshot
            .last_connected_at
            .map(|at| humantime::format_rfc3339_seconds(at).to_string()),
    })
}
