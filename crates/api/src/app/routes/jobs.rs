//! Requester and operator job routes.
//!
//! Admins see full job rows. Everyone else only sees jobs they requested, and
//! only through the reduced projection; a foreign job is reported as missing.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use gradeflow_auth::AuthContext;
use gradeflow_core::SubjectId;
use gradeflow_infra::jobs::{Job, JobFilter, queue_estimate};

use crate::app::dto::{self, JobAction};
use crate::app::{errors, services::AppServices};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs).delete(purge_failed))
        .route("/:id", get(get_job).patch(update_job).delete(cancel_job))
        .route("/:id/result", get(get_result))
        .route("/:id/history", get(get_history))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /jobs - Submit a feedback job for a finalized subject
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    let submission = match services.submitter.submit(&body.subject_id, &ctx).await {
        Ok(submission) => submission,
        Err(e) => return errors::submit_error_to_response(e),
    };

    if ctx.is_admin() {
        return (StatusCode::CREATED, Json(submission)).into_response();
    }

    let estimate = match queue_estimate(
        services.store.as_ref(),
        &submission.job,
        services.config.concurrency_cap,
        services.config.estimated_job_duration,
    )
    .await
    {
        Ok(e) => e,
        Err(e) => return errors::store_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "job": dto::job_summary_to_json(&submission.job, estimate),
            "dispatch": submission.dispatch,
        })),
    )
        .into_response()
}

/// GET /jobs - List jobs with per-status counts
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let status = match dto::parse_status(query.status.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let subject_id = match query.subject_id.filter(|s| !s.is_empty()).map(SubjectId::parse).transpose() {
        Ok(s) => s,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    // Requesters only ever see, and count, their own jobs.
    let requested_by = (!ctx.is_admin()).then(|| ctx.principal_id());
    let filter = JobFilter {
        status,
        subject_id,
        requested_by,
        limit: dto::clamp_limit(query.limit),
    };

    let items = match services.store.list(&filter).await {
        Ok(items) => items,
        Err(e) => return errors::store_error_to_response(e),
    };

    let since = Utc::now()
        - chrono::Duration::from_std(services.config.stats_window).unwrap_or(chrono::Duration::hours(24));

    let counts = match services.store.count_by_status(since, requested_by).await {
        Ok(c) => c,
        Err(e) => return errors::store_error_to_response(e),
    };

    if ctx.is_admin() {
        return Json(serde_json::json!({ "items": items, "counts": counts })).into_response();
    }

    let items: Vec<_> = items.iter().map(|j| dto::job_summary_to_json(j, None)).collect();
    Json(serde_json::json!({ "items": items, "counts": counts })).into_response()
}

/// GET /jobs/:id - Full detail for admins, queue projection for the requester
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job = match visible_job(&services, &ctx, &id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    if ctx.is_admin() {
        return Json(job).into_response();
    }

    let estimate = match queue_estimate(
        services.store.as_ref(),
        &job,
        services.config.concurrency_cap,
        services.config.estimated_job_duration,
    )
    .await
    {
        Ok(e) => e,
        Err(e) => return errors::store_error_to_response(e),
    };

    Json(dto::job_summary_to_json(&job, estimate)).into_response()
}

/// GET /jobs/:id/result - Feedback produced by a completed job
pub async fn get_result(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job = match visible_job(&services, &ctx, &id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    match services.results.for_job(job.id).await {
        Ok(Some(record)) => Json(dto::feedback_to_json(&record, ctx.is_admin())).into_response(),
        Ok(None) => errors::not_found("no feedback for this job"),
        Err(e) => errors::result_store_error_to_response(e),
    }
}

/// GET /jobs/:id/history - Every stored feedback version for the job's subject (admin only)
pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if !ctx.is_admin() {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", "feedback history is admin only");
    }
    let job = match visible_job(&services, &ctx, &id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    match services.results.history(&job.subject_id).await {
        Ok(records) => {
            let items: Vec<_> = records.iter().map(|r| dto::feedback_to_json(r, true)).collect();
            Json(serde_json::json!({ "subject_id": job.subject_id.as_str(), "items": items })).into_response()
        }
        Err(e) => errors::result_store_error_to_response(e),
    }
}

/// PATCH /jobs/:id - Operator actions (currently only `retry`)
pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateJobRequest>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match body.action {
        JobAction::Retry => match services.admin.retry(id, &ctx).await {
            Ok(job) => Json(job).into_response(),
            Err(e) => errors::admin_error_to_response(e),
        },
    }
}

/// DELETE /jobs/:id - Cancel a pending job
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.admin.cancel(id, &ctx).await {
        Ok(job) if ctx.is_admin() => Json(job).into_response(),
        Ok(job) => Json(dto::job_summary_to_json(&job, None)).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

/// DELETE /jobs - Purge every failed job
pub async fn purge_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> axum::response::Response {
    match services.admin.purge_failed(&ctx).await {
        Ok(purged) => Json(serde_json::json!({ "purged": purged })).into_response(),
        Err(e) => errors::admin_error_to_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Load a job the caller may see; foreign jobs are indistinguishable from missing ones.
async fn visible_job(
    services: &AppServices,
    ctx: &AuthContext,
    raw_id: &str,
) -> Result<Job, axum::response::Response> {
    let id = dto::parse_job_id(raw_id)?;
    let job = services
        .store
        .get(id)
        .await
        .map_err(errors::store_error_to_response)?;

    if !ctx.can_access(job.requested_by) {
        return Err(errors::not_found("job not found"));
    }
    Ok(job)
}
