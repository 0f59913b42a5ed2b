use axum::{routing::get, Router};

pub mod internal;
pub mod jobs;
pub mod system;

/// Router for all JWT-authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/jobs", jobs::router())
}
