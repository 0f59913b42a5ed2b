use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use gradeflow_auth::AuthContext;

use crate::app::services::AppServices;

/// GET /health - Liveness plus worker pool counters
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "dispatch": services.monitor.stats(),
    }))
}

pub async fn whoami(Extension(ctx): Extension<AuthContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "principal_id": ctx.principal_id().to_string(),
        "is_admin": ctx.is_admin(),
        "tier": ctx.tier(),
    }))
}
