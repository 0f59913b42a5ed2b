use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use gradeflow_infra::jobs::{AdminError, JobStoreError, SubmitError, TickError};
use gradeflow_infra::results::ResultStoreError;

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        SubmitError::Conflict { existing } => conflict(existing.to_string()),
        SubmitError::Store(e) => store_error_to_response(e),
    }
}

pub fn admin_error_to_response(err: AdminError) -> axum::response::Response {
    match err {
        AdminError::NotFound(_) => not_found("job not found"),
        AdminError::Forbidden { .. } => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        AdminError::InvalidState { current, .. } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "invalid_state",
                "message": err.to_string(),
                "current_status": current,
            })),
        )
            .into_response(),
        AdminError::Conflict { existing } => conflict(existing.to_string()),
        AdminError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) => not_found("job not found"),
        JobStoreError::Duplicate { existing, .. } => conflict(existing.to_string()),
        other => {
            error!(error = %other, "job store failure");
            internal("store_error")
        }
    }
}

pub fn result_store_error_to_response(err: ResultStoreError) -> axum::response::Response {
    error!(error = %err, "feedback store failure");
    internal("store_error")
}

pub fn tick_error_to_response(err: TickError) -> axum::response::Response {
    match err {
        TickError::Store(e) => store_error_to_response(e),
        TickError::Dispatch(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, "dispatch_unavailable", e.to_string()),
    }
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn conflict(existing_job_id: String) -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "error": "conflict",
            "message": "subject already has an active job",
            "existing_job_id": existing_job_id,
        })),
    )
        .into_response()
}

/// Internal failures never expose the underlying cause to callers.
fn internal(code: &'static str) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, "internal error")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
