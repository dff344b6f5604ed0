// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use longrun_core::{GuardError, TrackerError};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Guard(guard_err) => match guard_err {
                GuardError::InvalidSubject | GuardError::InvalidLease => {
                    tracing::warn!(error = %guard_err, "Rejected admission input");
                    (
                        StatusCode::BAD_REQUEST,
                        ErrorResponse::with_details("Bad request", guard_err.to_string()),
                    )
                }
                GuardError::NotFound(_) => internal(guard_err),
                GuardError::Unavailable(store_err) => {
                    tracing::error!(error = %store_err, "Submission guard unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        ErrorResponse::new("Submissions temporarily unavailable"),
                    )
                }
            },
            ApiError::Tracker(tracker_err) => match tracker_err {
                TrackerError::NotFound(id) => {
                    tracing::debug!(job_id = %id, "Job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                    )
                }
                TrackerError::AlreadyStarted(_) | TrackerError::InvalidTransition { .. } => internal(tracker_err),
            },
            ApiError::Internal(msg) => internal(msg),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Lifecycle errors no handler expects to see; never leak their details.
fn internal(err: &dyn std::fmt::Display) -> (StatusCode, ErrorResponse) {
    tracing::error!(error = %err, "Internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new("Internal server error"),
    )
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
