//! Machine-to-machine endpoints behind shared secrets.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::warn;

use gradeflow_infra::jobs::RunTarget;

use crate::app::{dto, errors, services::AppServices};

pub fn scheduler_router() -> Router {
    Router::new().route("/tick", post(tick))
}

pub fn processor_router() -> Router {
    Router::new().route("/run", post(run))
}

/// POST /scheduler/tick - Sweep zombies, then dispatch up to the headroom
pub async fn tick(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.tick.tick().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::tick_error_to_response(e),
    }
}

/// POST /processor/run - Enqueue a processor run; `{"job_id": ...}` is optional
pub async fn run(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let request: dto::RunProcessorRequest = if body.iter().all(u8::is_ascii_whitespace) {
        dto::RunProcessorRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        }
    };

    let target = RunTarget::from(request.job_id);
    match services.dispatcher.dispatch(target).await {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "target": target, "dispatch": outcome })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "processor run rejected");
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "dispatch_unavailable", e.to_string())
        }
    }
}
