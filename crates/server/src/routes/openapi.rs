//! OpenAPI document for the HTTP API.

use axum::Json;
use utoipa::OpenApi;

use super::{health, jobs, locks};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "longrun",
        description = "Admission control and progress tracking for long-running jobs"
    ),
    paths(
        health::health_check,
        jobs::start_job,
        jobs::list_jobs,
        jobs::get_job,
        locks::lock_status,
    ),
    components(schemas(
        longrun_core::JobId,
        longrun_core::JobState,
        longrun_core::JobSnapshot,
        jobs::DedupeScope,
        jobs::StartJobRequest,
        jobs::StartJobResponse,
        locks::LockStatus,
        locks::LockStatusResponse,
        health::HealthResponse,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Job admission and progress"),
        (name = "system", description = "Server status")
    )
)]
pub struct ApiDoc;

/// GET /api/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_job_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/jobs"));
        assert!(doc.paths.paths.contains_key("/api/jobs/{id}"));
        assert!(doc.paths.paths.contains_key("/api/locks"));
    }
}
