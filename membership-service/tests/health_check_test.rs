//! Health check integration tests for membership-service.

mod common;

use std::sync::Arc;

use common::TestApp;
use membership_service::config::MembershipConfig;
use membership_service::services::{ManualClock, MemoryStore};
use membership_service::startup::Application;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "membership-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/ready"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn metrics_endpoint_works() {
    let app = TestApp::spawn().await;

    // Generate at least one renewal sample.
    app.run_billing().await;

    let response = app
        .client
        .get(app.url("/metrics"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or("").contains("text/plain"))
        .unwrap_or(false));

    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("membership_billing_runs_total"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
}

#[tokio::test]
async fn listener_binds_configured_host() {
    let mut config = MembershipConfig::for_memory_store(0);
    config.common.host = "127.0.0.1".to_string();
    config.billing.enabled = false;

    let app = Application::build_with_store(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(common::date("2024-01-15"))),
    )
    .await
    .expect("Failed to build application");

    assert!(app.http_addr().ip().is_loopback());
    assert_ne!(app.http_port(), 0);
}
