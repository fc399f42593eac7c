//! HTTP routes
//!
//! Thin mapping from HTTP onto the runtime [`Gateway`]. The router owns
//! nothing; every decision is made by the core.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use sluice_core::constants::PARAMETERS_SIZE_BYTES_MAX;
use sluice_runtime::{ExecutionResponse, Gateway};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Body for unknown routes
pub const NOT_FOUND_BODY: &str = "404 - Page not found.\n";
/// Body for parameters that are not UTF-8 text
pub const BAD_PARAMETERS_BODY: &str = "400 - Execution parameters must be UTF-8 text.\n";

/// Shared router state
#[derive(Clone)]
pub struct AppState {
    gateway: Gateway,
}

/// Create the router serving `gateway`
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        // Execution
        .route("/", any(execute))
        // Supervisor endpoints
        .route("/health", get(health_check).fallback(not_found))
        .route("/status", get(status).fallback(not_found))
        .route("/metrics", get(metrics).fallback(not_found))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(PARAMETERS_SIZE_BYTES_MAX))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway })
}

/// Run one execution with the request body as parameters
async fn execute(State(state): State<AppState>, body: Bytes) -> Response {
    let parameters = match String::from_utf8(body.to_vec()) {
        Ok(parameters) => parameters,
        Err(_) => {
            debug!("Rejected non UTF-8 execution parameters");
            return plain_text(StatusCode::BAD_REQUEST, BAD_PARAMETERS_BODY.to_string());
        }
    };

    let response = state.gateway.execute(parameters).await;
    execution_response(response)
}

fn execution_response(response: ExecutionResponse) -> Response {
    let status = StatusCode::from_u16(response.status.http_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type())],
        response.body,
    )
        .into_response()
}

/// Health check endpoint
///
/// 200 only while healthy; overloaded, crashed, initializing and
/// terminating all answer 503 so external routing stops sending load.
async fn health_check(State(state): State<AppState>) -> Response {
    if state.gateway.is_healthy() {
        plain_text(StatusCode::OK, "healthy\n".to_string())
    } else {
        plain_text(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{}\n", state.gateway.health_status()),
        )
    }
}

/// Status snapshot
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub healthy: bool,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub uptime_seconds: u64,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_reason: Option<String>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let gateway = &state.gateway;
    Json(StatusResponse {
        state: gateway.health_status().to_string(),
        healthy: gateway.is_healthy(),
        queue_len: gateway.queue_len(),
        queue_capacity: gateway.queue_capacity(),
        uptime_seconds: gateway.uptime().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        crash_reason: gateway.crash_reason(),
    })
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let (admitted, rejected) = gateway.admission_counts();
    let stats = gateway.consumer_stats();

    let metrics_text = format!(
        "# HELP sluice_queue_length Requests waiting in the admission queue\n\
         # TYPE sluice_queue_length gauge\n\
         sluice_queue_length {}\n\
         # HELP sluice_queue_capacity Admission queue capacity\n\
         # TYPE sluice_queue_capacity gauge\n\
         sluice_queue_capacity {}\n\
         # HELP sluice_healthy Whether the server reports healthy\n\
         # TYPE sluice_healthy gauge\n\
         sluice_healthy {}\n\
         # HELP sluice_requests_admitted_total Requests admitted into the queue\n\
         # TYPE sluice_requests_admitted_total counter\n\
         sluice_requests_admitted_total {}\n\
         # HELP sluice_requests_rejected_total Requests rejected at admission\n\
         # TYPE sluice_requests_rejected_total counter\n\
         sluice_requests_rejected_total {}\n\
         # HELP sluice_executions_total Executions that produced a result\n\
         # TYPE sluice_executions_total counter\n\
         sluice_executions_total {}\n\
         # HELP sluice_execution_faults_total Executions that faulted\n\
         # TYPE sluice_execution_faults_total counter\n\
         sluice_execution_faults_total {}\n\
         # HELP sluice_uptime_seconds Server uptime in seconds\n\
         # TYPE sluice_uptime_seconds gauge\n\
         sluice_uptime_seconds {}\n",
        gateway.queue_len(),
        gateway.queue_capacity(),
        u8::from(gateway.is_healthy()),
        admitted,
        rejected,
        stats.executed(),
        stats.faulted(),
        gateway.uptime().as_secs(),
    );

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics_text,
    )
        .into_response()
}

async fn not_found() -> Response {
    plain_text(StatusCode::NOT_FOUND, NOT_FOUND_BODY.to_string())
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
