//! `gradeflow-auth`: authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it validates
//! tokens and resolves them into a typed [`AuthContext`] once per request.

pub mod claims;
pub mod context;
pub mod jwt;
pub mod roles;
pub mod secret;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use context::{AuthContext, RequesterTier};
pub use gradeflow_core::PrincipalId;
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use roles::Role;
pub use secret::SharedSecret;
