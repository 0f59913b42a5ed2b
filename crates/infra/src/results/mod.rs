//! Versioned persistence of generated feedback.
//!
//! One record per job. A subject accumulates versions as it is regenerated;
//! older versions are kept.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryFeedbackStore;
pub use postgres::PostgresFeedbackStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use gradeflow_ai::Feedback;
use gradeflow_core::{JobId, SubjectId};

/// Stored feedback for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub subject_id: SubjectId,
    /// 1 + the highest earlier version for the same subject.
    pub version: u32,
    pub body: String,
    pub metadata: serde_json::Value,
    /// `started_at` of the claim that produced this feedback.
    pub claimed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResultStoreError {
    #[error("corrupt feedback row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait FeedbackStore: Send + Sync + 'static {
    /// Persist feedback for `job_id`, produced by the claim started at `claimed_at`.
    ///
    /// Saving again for the same job replaces the body and keeps the version,
    /// so a retried finalization never produces a second record. A save from
    /// an older claim than the stored one is ignored and returns `None`.
    async fn save(
        &self,
        job_id: JobId,
        subject_id: &SubjectId,
        feedback: &Feedback,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<FeedbackRecord>, ResultStoreError>;

    /// Drop the feedback for `job_id` if it was saved by the claim started at
    /// `claimed_at`. Returns whether a record was removed.
    async fn discard(&self, job_id: JobId, claimed_at: DateTime<Utc>) -> Result<bool, ResultStoreError>;

    async fn for_job(&self, job_id: JobId) -> Result<Option<FeedbackRecord>, ResultStoreError>;

    /// All versions for a subject, newest first.
    async fn history(&self, subject_id: &SubjectId) -> Result<Vec<FeedbackRecord>, ResultStoreError>;
}
