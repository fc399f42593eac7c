//! HTTP contract tests for the sluice server

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use sluice_core::{MemoryFetcher, SluiceConfig};
use sluice_runtime::Orchestrator;
use sluice_sandbox::{MockBackend, SandboxError};
use sluice_server::router;
use std::sync::Arc;
use tower::ServiceExt;

// =============================================================================
// Helpers
// =============================================================================

async fn test_app(backend: MockBackend, capacity: usize) -> (Router, Orchestrator) {
    let mut config = SluiceConfig::default();
    config.queue.capacity = capacity;
    config.initialization.dummy = true;

    let mut orchestrator =
        Orchestrator::new(config, Box::new(backend), Arc::new(MemoryFetcher::new())).unwrap();
    orchestrator.start().await.unwrap();

    (router(orchestrator.gateway()), orchestrator)
}

async fn send(app: &Router, method: &str, uri: &str, body: impl Into<Body>) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn faulting_backend() -> MockBackend {
    MockBackend::new().with_handler(|parameters| {
        if parameters.contains("explode") {
            Err(SandboxError::ExecutionFault {
                reason: "stack trace with secrets".into(),
            })
        } else {
            Ok("{\"result\":42}".to_string())
        }
    })
}

// =============================================================================
// Execution Route
// =============================================================================

#[tokio::test]
async fn test_execute_success() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from("{\"method\":\"hello\"}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"{\"method\":\"hello\"}");

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_execute_any_method() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;

    let (status, body) = send(&app, "PUT", "/", "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "{}");

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_execute_fault_hides_internals() {
    let (app, mut orchestrator) = test_app(faulting_backend(), 4).await;

    let (status, body) = send(&app, "POST", "/", "{\"explode\":true}").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("secrets"));

    let (status, body) = send(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "crashed\n");

    // Later work still executes, health stays down
    let (status, _) = send(&app, "POST", "/", "{}").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_execute_rejects_non_utf8() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;

    let (status, _) = send(&app, "POST", "/", vec![0xffu8, 0xfe, 0xfd]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(orchestrator.gateway().admission_counts(), (0, 0));

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_execute_after_stop_is_shutting_down() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;
    orchestrator.stop().await;

    let (status, body) = send(&app, "POST", "/", "{}").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("shutting down"));
}

// =============================================================================
// Supervisor Routes
// =============================================================================

#[tokio::test]
async fn test_health_ok() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;

    let (status, body) = send(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "healthy\n");

    orchestrator.stop().await;
    let (status, body) = send(&app, "GET", "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "terminating\n");
}

#[tokio::test]
async fn test_status_json() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 7).await;

    let (status, body) = send(&app, "GET", "/status", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["state"], "healthy");
    assert_eq!(json["healthy"], true);
    assert_eq!(json["queue_len"], 0);
    assert_eq!(json["queue_capacity"], 7);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json.get("crash_reason").is_none());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_status_reports_crash_reason() {
    let (app, mut orchestrator) = test_app(faulting_backend(), 4).await;
    send(&app, "POST", "/", "explode").await;

    let (_, body) = send(&app, "GET", "/status", Body::empty()).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["state"], "crashed");
    assert!(json["crash_reason"]
        .as_str()
        .unwrap()
        .contains("stack trace with secrets"));

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_metrics_text() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 3).await;
    send(&app, "POST", "/", "{}").await;

    let (status, body) = send(&app, "GET", "/metrics", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("sluice_queue_capacity 3"));
    assert!(body.contains("sluice_healthy 1"));
    assert!(body.contains("sluice_requests_admitted_total 1"));
    assert!(body.contains("sluice_executions_total 1"));

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_unknown_routes_are_404() {
    let (app, mut orchestrator) = test_app(MockBackend::new(), 4).await;

    for (method, uri) in [("GET", "/nope"), ("POST", "/health"), ("DELETE", "/status")] {
        let (status, body) = send(&app, method, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body, "404 - Page not found.\n");
    }

    orchestrator.stop().await;
}
