use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};

use gradeflow_auth::{AuthContext, JwtValidator, SharedSecret};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Validates the bearer token and resolves it into an [`AuthContext`]
/// request extension. Handlers never look at roles themselves.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(AuthContext::resolve(&claims));

    Ok(next.run(req).await)
}

/// Shared-secret guard for machine-to-machine endpoints.
#[derive(Clone)]
pub struct SecretState {
    /// Header carrying the secret; `Authorization: Bearer` is also accepted.
    pub header: &'static str,
    pub secret: SharedSecret,
}

pub async fn secret_middleware(
    State(state): State<SecretState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let headers = req.headers();
    let presented = headers
        .get(state.header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .or_else(|| extract_bearer(headers).ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !state.secret.verify(presented) {
        debug!(header = state.header, "rejected shared secret");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

/// One span per request; logs status and latency once the handler returns.
pub async fn trace_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let span = info_span!("request", method = %req.method(), path = %req.uri().path());
    let started = Instant::now();

    let res = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
    });
    res
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
