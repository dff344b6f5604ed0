// crates/server/src/routes/jobs.rs
//! API routes for job submission and progress.
//!
//! - POST /jobs — Admit and dispatch a job, or point at the one in flight
//! - GET /jobs — List all active jobs
//! - GET /jobs/{id} — Poll one job
//! - GET /jobs/stream — SSE stream of job progress updates

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use longrun_core::{AdmitResult, GuardError, JobId, JobSnapshot, SubjectKey};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::metrics::record_admission;
use crate::state::AppState;
use crate::worker::ItemJob;

/// Operation name used when the request does not carry one.
pub const DEFAULT_OPERATION: &str = "process-items";

/// What makes two submissions duplicates of each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DedupeScope {
    /// One job per user and operation.
    #[default]
    Operation,
    /// One job per user, operation and identical item list.
    Payload,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub user_id: u64,
    #[serde(default)]
    pub operation: Option<String>,
    #[schema(value_type = Vec<f64>)]
    pub items: Vec<serde_json::Number>,
    #[serde(default)]
    pub dedupe: DedupeScope,
}

impl StartJobRequest {
    fn subject(&self) -> ApiResult<SubjectKey> {
        let caller = format!("user:{}", self.user_id);
        let operation = self.operation.as_deref().unwrap_or(DEFAULT_OPERATION);
        let subject = match self.dedupe {
            DedupeScope::Operation => SubjectKey::for_operation(&caller, operation)?,
            DedupeScope::Payload => {
                let payload = serde_json::to_string(&self.items)
                    .map_err(|e| ApiError::Internal(format!("serialize items: {e}")))?;
                SubjectKey::for_payload(&caller, operation, &payload)?
            }
        };
        Ok(subject)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    pub job_id: JobId,
    pub message: String,
}

/// POST /api/jobs — Admit a job unless one is already running for the subject.
#[utoipa::path(
    post,
    path = "/api/jobs",
    tag = "jobs",
    request_body = StartJobRequest,
    responses(
        (status = 202, description = "Job admitted and dispatched", body = StartJobResponse),
        (status = 200, description = "A job for this subject is already in progress", body = StartJobResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 503, description = "Admission cannot be decided", body = ErrorResponse)
    )
)]
pub async fn start_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    if req.items.is_empty() {
        return Err(ApiError::BadRequest("No items provided".into()));
    }
    let subject = req.subject()?;

    let outcome = match state.guard.try_admit(&subject, state.config.lease).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, GuardError::Unavailable(_)) {
                record_admission("unavailable");
            }
            return Err(e.into());
        }
    };

    match outcome {
        AdmitResult::Admitted { job_id } => {
            record_admission("admitted");
            if let Err(e) = state.dispatcher.dispatch(ItemJob::new(job_id, req.items)).await {
                tracing::error!(job_id = %job_id, error = %e, "dispatch failed, rolling back admission");
                if let Err(fail_err) = state.tracker.fail(job_id, e.to_string()) {
                    tracing::error!(job_id = %job_id, error = %fail_err, "could not record dispatch failure");
                }
                if let Err(release_err) = state.guard.release(job_id).await {
                    tracing::warn!(job_id = %job_id, error = %release_err, "release after dispatch failure");
                }
                return Err(ApiError::Internal(e.to_string()));
            }
            Ok((
                StatusCode::ACCEPTED,
                Json(StartJobResponse {
                    job_id,
                    message: "Your task is processing".into(),
                }),
            ))
        }
        AdmitResult::AlreadyInProgress { job_id } => {
            record_admission("in_progress");
            Ok((
                StatusCode::OK,
                Json(StartJobResponse {
                    job_id,
                    message: "Task is already in progress".into(),
                }),
            ))
        }
    }
}

/// GET /api/jobs — List all active jobs.
#[utoipa::path(
    get,
    path = "/api/jobs",
    tag = "jobs",
    responses((status = 200, description = "Pending and running jobs", body = Vec<JobSnapshot>))
)]
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.tracker.active())
}

/// GET /api/jobs/{id} — Current snapshot of one job.
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    tag = "jobs",
    params(("id" = String, Path, description = "Job id returned on admission")),
    responses(
        (status = 200, description = "Job snapshot", body = JobSnapshot),
        (status = 400, description = "Malformed job id", body = ErrorResponse),
        (status = 404, description = "Unknown or expired job", body = ErrorResponse)
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid job id: {id}")))?;
    Ok(Json(state.tracker.query(job_id)?))
}

/// GET /api/jobs/stream — SSE stream of all job progress updates.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tracker.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    let json = serde_json::to_string(&snapshot).unwrap_or_default();
                    yield Ok(Event::default().event("progress").data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "job stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(start_job))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dedupe: DedupeScope, items: &[i64]) -> StartJobRequest {
        StartJobRequest {
            user_id: 42,
            operation: None,
            items: items.iter().copied().map(serde_json::Number::from).collect(),
            dedupe,
        }
    }

    #[test]
    fn test_router_creation() {
        let _router = router();
    }

    #[test]
    fn test_request_defaults() {
        let req: StartJobRequest = serde_json::from_str(r#"{"userId": 1, "items": [1, 2.5]}"#).unwrap();
        assert_eq!(req.dedupe, DedupeScope::Operation);
        assert!(req.operation.is_none());
        assert_eq!(req.items.len(), 2);
    }

    #[test]
    fn test_operation_scope_ignores_items() {
        let a = request(DedupeScope::Operation, &[1, 2, 3]).subject().unwrap();
        let b = request(DedupeScope::Operation, &[4]).subject().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "user:42:process-items");
    }

    #[test]
    fn test_payload_scope_distinguishes_items() {
        let a = request(DedupeScope::Payload, &[1, 2, 3]).subject().unwrap();
        let b = request(DedupeScope::Payload, &[1, 2, 3]).subject().unwrap();
        let c = request(DedupeScope::Payload, &[4]).subject().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_blank_operation_rejected() {
        let mut req = request(DedupeScope::Operation, &[1]);
        req.operation = Some("  ".into());
        assert!(matches!(req.subject(), Err(ApiError::Guard(GuardError::InvalidSubject))));
    }
}
