use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use gradeflow_ai::Feedback;
use gradeflow_core::{JobId, SubjectId};

use super::{FeedbackRecord, FeedbackStore, ResultStoreError};

/// In-memory feedback store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackStore {
    records: RwLock<HashMap<JobId, FeedbackRecord>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> ResultStoreError {
    ResultStoreError::Storage("feedback store lock poisoned".to_string())
}

#[async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn save(
        &self,
        job_id: JobId,
        subject_id: &SubjectId,
        feedback: &Feedback,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<FeedbackRecord>, ResultStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;

        if let Some(existing) = records.get_mut(&job_id) {
            if existing.claimed_at > claimed_at {
                return Ok(None);
            }
            existing.body = feedback.body.clone();
            existing.metadata = feedback.metadata.clone();
            existing.claimed_at = claimed_at;
            existing.created_at = now;
            return Ok(Some(existing.clone()));
        }

        let version = records
            .values()
            .filter(|r| &r.subject_id == subject_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;

        let record = FeedbackRecord {
            id: Uuid::now_v7(),
            job_id,
            subject_id: subject_id.clone(),
            version,
            body: feedback.body.clone(),
            metadata: feedback.metadata.clone(),
            claimed_at,
            created_at: now,
        };
        records.insert(job_id, record.clone());
        Ok(Some(record))
    }

    async fn discard(&self, job_id: JobId, claimed_at: DateTime<Utc>) -> Result<bool, ResultStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.get(&job_id).is_some_and(|r| r.claimed_at == claimed_at) {
            records.remove(&job_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn for_job(&self, job_id: JobId) -> Result<Option<FeedbackRecord>, ResultStoreError> {
        Ok(self.records.read().map_err(poisoned)?.get(&job_id).cloned())
    }

    async fn history(&self, subject_id: &SubjectId) -> Result<Vec<FeedbackRecord>, ResultStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut history: Vec<_> = records
            .values()
            .filter(|r| &r.subject_id == subject_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(history)
    }
}
