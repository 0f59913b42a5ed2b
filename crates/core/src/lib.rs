//! `gradeflow-core`: shared building blocks for the feedback pipeline.
//!
//! This crate contains **pure** primitives (identifiers, error model). No IO,
//! no storage, no HTTP.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, PrincipalId, SubjectId};
