//! API route handlers for the longrun server.

pub mod health;
pub mod jobs;
pub mod locks;
pub mod metrics;
pub mod openapi;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Create the combined router.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs - Admit and dispatch a job
/// - GET  /api/jobs - List active jobs
/// - GET  /api/jobs/{id} - Poll one job
/// - GET  /api/jobs/stream - SSE stream of job progress
/// - GET  /api/locks?subject= - Lock holder for a subject
/// - GET  /api/openapi.json - OpenAPI document
/// - GET  /ws/progress - WebSocket progress for one job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", locks::router())
        .route("/api/openapi.json", get(openapi::openapi_json))
        .route("/ws/progress", get(ws::progress_ws))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
}
