//! Prometheus scrape endpoint.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::metrics::render_metrics;

/// GET /metrics - Prometheus text exposition format.
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}
