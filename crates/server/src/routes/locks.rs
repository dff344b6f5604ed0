// crates/server/src/routes/locks.rs
//! GET /locks — whether a subject currently holds an admission lock.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use longrun_core::{JobId, SubjectKey};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiResult, ErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LockQuery {
    pub subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    InProgress,
    Idle,
}

#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct LockStatusResponse {
    pub status: LockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// GET /api/locks?subject=... — Live lock holder for a subject key.
#[utoipa::path(
    get,
    path = "/api/locks",
    tag = "jobs",
    params(("subject" = String, Query, description = "Subject key, e.g. user:42:process-items")),
    responses(
        (status = 200, description = "Lock status", body = LockStatusResponse),
        (status = 400, description = "Blank subject", body = ErrorResponse),
        (status = 503, description = "Lock store unavailable", body = ErrorResponse)
    )
)]
pub async fn lock_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Json<LockStatusResponse>> {
    let subject = SubjectKey::new(query.subject)?;
    let response = match state.guard.holder(&subject).await? {
        Some(job_id) => LockStatusResponse {
            status: LockStatus::InProgress,
            job_id: Some(job_id),
        },
        None => LockStatusResponse {
            status: LockStatus::Idle,
            job_id: None,
        },
    };
    Ok(Json(response))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/locks", get(lock_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_status_serialization() {
        let idle = LockStatusResponse {
            status: LockStatus::Idle,
            job_id: None,
        };
        assert_eq!(serde_json::to_string(&idle).unwrap(), r#"{"status":"idle"}"#);

        let busy = LockStatusResponse {
            status: LockStatus::InProgress,
            job_id: Some(JobId::new()),
        };
        let json = serde_json::to_string(&busy).unwrap();
        assert!(json.contains("\"status\":\"in_progress\""));
        assert!(json.contains("\"jobId\""));
    }
}
