use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Generated feedback for one subject.
///
/// Opaque to the pipeline: it is persisted as-is and handed back to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// The review text shown to the requester.
    pub body: String,

    /// Free-form metadata (model name, scores, timings, etc).
    #[serde(default)]
    pub metadata: JsonValue,
}

impl Feedback {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            metadata: JsonValue::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Why a generation call did not produce feedback.
///
/// All variants are treated the same by the retry policy; the distinction
/// only matters for logs and the stored error message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("invalid generation input: {0}")]
    InvalidInput(String),

    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generator unavailable: {0}")]
    Unavailable(String),
}
