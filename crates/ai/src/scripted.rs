//! Deterministic generator for tests and local development.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::generator::{FeedbackGenerator, GenerationRequest};
use crate::result::{Feedback, GenerationError};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Succeed(Feedback),
    Fail(String),
    /// Sleep before succeeding (used to exercise timeouts).
    Delay(Duration, Feedback),
}

/// Replays a queue of [`ScriptedReply`]s, then falls back to a default.
///
/// Records every request it sees so tests can assert on call counts.
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// Succeeds on every call.
    pub fn succeeding() -> Self {
        Self::with_fallback(ScriptedReply::Succeed(Feedback::new("Looks good.")))
    }

    /// Fails on every call with `cause`.
    pub fn failing(cause: impl Into<String>) -> Self {
        Self::with_fallback(ScriptedReply::Fail(cause.into()))
    }

    pub fn with_fallback(fallback: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply ahead of the fallback.
    pub fn then(self, reply: ScriptedReply) -> Self {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl FeedbackGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Feedback, GenerationError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            ScriptedReply::Succeed(feedback) => Ok(feedback),
            ScriptedReply::Fail(cause) => Err(GenerationError::Failed(cause)),
            ScriptedReply::Delay(delay, feedback) => {
                tokio::time::sleep(delay).await;
                Ok(feedback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradeflow_core::{JobId, SubjectId};

    fn request() -> GenerationRequest {
        GenerationRequest {
            job_id: JobId::new(),
            subject_id: SubjectId::parse("a-1").unwrap(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn replays_queue_then_fallback() {
        let generator = ScriptedGenerator::succeeding().then(ScriptedReply::Fail("boom".into()));

        assert_eq!(
            generator.generate(&request()).await,
            Err(GenerationError::Failed("boom".into()))
        );
        assert!(generator.generate(&request()).await.is_ok());
        assert_eq!(generator.call_count(), 2);
    }
}
