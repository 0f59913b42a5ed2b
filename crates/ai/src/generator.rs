use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gradeflow_core::{JobId, SubjectId};

use crate::result::{Feedback, GenerationError};

/// Input handed to the generator for one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub subject_id: SubjectId,
    /// 1-based attempt number of the job being executed.
    pub attempt: u32,
}

/// The single opaque `generate(assignment) -> result` operation.
///
/// Implementations may take tens of seconds; callers bound them with their
/// own timeout. Must be safe to call again for the same subject (a retried
/// job calls it once per attempt).
#[async_trait]
pub trait FeedbackGenerator: Send + Sync + 'static {
    async fn generate(&self, request: &GenerationRequest) -> Result<Feedback, GenerationError>;
}

/// Placeholder used when no generator endpoint is configured.
///
/// Every call fails, so jobs exhaust their attempts and end up `failed`
/// with a readable cause instead of hanging in `processing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl FeedbackGenerator for UnconfiguredGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Feedback, GenerationError> {
        Err(GenerationError::Unavailable(
            "no feedback generator configured (set GENERATOR_URL)".to_string(),
        ))
    }
}
