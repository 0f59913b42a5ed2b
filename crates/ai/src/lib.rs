//! `gradeflow-ai`
//!
//! **Responsibility:** boundary to the external feedback generator.
//!
//! The prompt, rubric and retrieval context all live on the other side of
//! [`FeedbackGenerator::generate`]. This crate knows nothing about jobs,
//! retries or storage: it turns a [`GenerationRequest`] into [`Feedback`] or a
//! [`GenerationError`].

pub mod generator;
pub mod http;
pub mod result;
pub mod scripted;

pub use generator::{FeedbackGenerator, GenerationRequest, UnconfiguredGenerator};
pub use http::HttpFeedbackGenerator;
pub use result::{Feedback, GenerationError};
pub use scripted::{ScriptedGenerator, ScriptedReply};
