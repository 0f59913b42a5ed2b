//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: pipeline handles shared by handlers, store/generator selection
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON projections
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, AuthSettings};

pub const SCHEDULER_SECRET_HEADER: &str = "x-scheduler-secret";
pub const PROCESSOR_SECRET_HEADER: &str = "x-processor-secret";

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, auth: AuthSettings) -> Router {
    let auth_state = middleware::AuthState { jwt: auth.jwt };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    let scheduler = routes::internal::scheduler_router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            middleware::SecretState {
                header: SCHEDULER_SECRET_HEADER,
                secret: auth.scheduler_secret,
            },
            middleware::secret_middleware,
        ));

    let processor = routes::internal::processor_router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            middleware::SecretState {
                header: PROCESSOR_SECRET_HEADER,
                secret: auth.processor_secret,
            },
            middleware::secret_middleware,
        ));

    let public = Router::new()
        .route("/health", get(routes::system::health))
        .layer(Extension(services));

    Router::new()
        .merge(public)
        .nest("/scheduler", scheduler)
        .nest("/processor", processor)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::trace_requests)))
}
