//! HTTP surface
//!
//! - `GET /health`: loader freshness report, 503 when any check fails
//! - `GET /ready`: 200 once every loader has succeeded at least once
//! - `GET /status`: pipeline counters and loader states
//! - `POST /v1/data`: run a `LogicalQuery`, answer with a `ResultSet`

pub mod data;
mod telemetry;

use crate::loader::{HealthRegistry, LoaderScheduler, LoaderState};
use crate::pipeline::{PipelineStats, RequestPipeline};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::Router;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<RequestPipeline>,
    pub health: Arc<HealthRegistry>,
    pub scheduler: Arc<LoaderScheduler>,
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/status", get(status))
        .route("/v1/data", post(data::execute))
        .with_state(state)
        .layer(middleware::from_fn(telemetry::track_requests))
        .layer(cors)
}

async fn health_check(State(state): State<ApiState>) -> Response {
    let report = state.health.report();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// Ready once metadata has been loaded; before that every request would be
/// answered from empty availability.
async fn ready_check(State(state): State<ApiState>) -> Response {
    let pending: Vec<String> = state
        .scheduler
        .states()
        .into_iter()
        .filter(|(_, s)| s.last_success.is_none())
        .map(|(name, _)| name)
        .collect();
    if pending.is_empty() {
        (StatusCode::OK, "READY").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("NOT READY: waiting for {}", pending.join(", ")),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub pipeline: PipelineStats,
    pub loaders: BTreeMap<String, LoaderState>,
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        pipeline: state.pipeline.counters().snapshot(),
        loaders: state.scheduler.states().into_iter().collect(),
    })
}
