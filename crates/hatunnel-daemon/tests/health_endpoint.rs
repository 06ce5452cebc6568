#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use hatunnel_core::{HealthReporter, health};
use hatunnel_daemon::health::{AppState, build_router};

fn test_app(report_state: bool) -> (Router, HealthReporter, watch::Sender<bool>) {
    let (reporter, health_rx) = health::channel();
    let (proxy_tx, proxy_rx) = watch::channel(true);
    let app = build_router(AppState {
        tunnel: health_rx,
        proxy_up: proxy_rx,
        report_state_enabled: report_state,
    });
    (app, reporter, proxy_tx)
}

async fn send_request(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn get_health(app: &Router) -> (StatusCode, Value) {
    let (status, body) = send_request(app, "/health").await;
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn health_reports_degraded_before_first_connect() {
    let (app, _reporter, _proxy_tx) = test_app(false);
    let (status, json) = get_health(&app).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["tunnel_connected"], false);
    assert_eq!(json["proxy_running"], true);
    assert_eq!(json["report_state_enabled"], false);
    assert!(json.get("last_error").is_none(), "no failure recorded yet");
    assert!(json.get("last_connected_at").is_none());
}

#[tokio::test]
async fn health_reports_ok_when_connected() {
    let (app, reporter, _proxy_tx) = test_app(false);
    reporter.record_connected();

    let (status, json) = get_health(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tunnel_connected"], true);

    let connected_at = json["last_connected_at"].as_str().unwrap();
    assert!(connected_at.ends_with('Z'), "rfc3339 timestamp, got {connected_at}");
}

#[tokio::test]
async fn health_keeps_last_connect_time_after_failure() {
    let (app, reporter, _proxy_tx) = test_app(false);
    reporter.record_connected();
    reporter.record_disconnected("Network error: connection reset");

    let (status, json) = get_health(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["last_error"], "Network error: connection reset");
    assert!(json.get("last_connected_at").is_some(), "history survives a disconnect");
}

#[tokio::test]
async fn health_stays_200_through_repeated_auth_failures() {
    let (app, reporter, _proxy_tx) = test_app(false);

    for _ in 0..5 {
        reporter.record_disconnected("Authentication rejected: bad credentials");
        let (status, json) = get_health(&app).await;
        assert_eq!(status, StatusCode::OK, "health must never fail at the transport level");
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["tunnel_connected"], false);
    }
}

#[tokio::test]
async fn health_degrades_when_the_proxy_side_stops() {
    let (app, reporter, proxy_tx) = test_app(false);
    reporter.record_connected();
    proxy_tx.send(false).unwrap();

    let (status, json) = get_health(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["tunnel_connected"], true);
    assert_eq!(json["proxy_running"], false);
}

#[tokio::test]
async fn health_echoes_report_state_config() {
    let (app, _reporter, _proxy_tx) = test_app(true);
    let (_, json) = get_health(&app).await;
    assert_eq!(json["report_state_enabled"], true);
}

#[tokio::test]
async fn index_serves_the_banner() {
    let (app, _reporter, _proxy_tx) = test_app(false);
    let (status, body) = send_request(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("hatunnel"), "got: {body}");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (app, _reporter, _proxy_tx) = test_app(false);
    let (status, _) = send_request(&app, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
