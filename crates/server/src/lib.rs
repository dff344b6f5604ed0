// crates/server/src/lib.rs
//! longrun server library.
//!
//! Axum HTTP layer over `longrun-core`: admits item-processing jobs without
//! duplicates, runs them in the background, and serves their progress by
//! polling, SSE and WebSocket.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod worker;
pub mod ws;

pub use config::ServerConfig;
pub use error::*;
pub use crate::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API, WebSocket and metrics routes
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the periodic maintenance pass.
///
/// Each tick fails jobs whose lease lapsed without a release, then sweeps
/// finished records past retention and purges expired locks.
pub fn spawn_maintenance(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.guard.reap_orphans().await {
                tracing::warn!(error = %e, "orphan reaping failed");
            }
            let swept = state.tracker.sweep(state.config.retention);
            match state.guard.purge_expired().await {
                Ok(purged) => {
                    tracing::debug!(records_swept = swept, locks_purged = purged, "maintenance pass");
                }
                Err(e) => {
                    tracing::warn!(records_swept = swept, error = %e, "lock purge failed");
                }
            }
        }
    })
}
