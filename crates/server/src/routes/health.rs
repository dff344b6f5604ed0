// crates/server/src/routes/health.rs
//! GET /health — liveness plus a glance at the guard.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Backend holding admission locks, e.g. `memory`.
    pub lock_store: String,
    /// Jobs admitted and not yet terminal.
    pub active_jobs: usize,
}

impl HealthResponse {
    fn from_state(state: &AppState) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            lock_store: state.guard.store_name().to_string(),
            active_jobs: state.tracker.active().len(),
        }
    }
}

/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::from_state(&state))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
