//! Job storage: the source of truth for job state.
//!
//! Every state change is a conditional write keyed on the current status
//! ([`JobStore::update_status`]). There is no lock abstraction; a write that
//! matches zero rows means another execution context got there first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gradeflow_core::{JobId, PrincipalId, SubjectId};

use super::types::{Job, JobFilter, JobStatus, NewJob, StatusCounts, StatusUpdate};

/// Message stored on jobs the zombie sweep finds with no attempts left.
pub const ABANDONED_MESSAGE: &str = "abandoned while processing; no attempts left";

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a `pending` job.
    ///
    /// Fails with [`JobStoreError::Duplicate`] if the subject already has an
    /// active (pending or processing) job.
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError>;

    /// Get a job by id.
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// The active job for a subject, if any.
    async fn active_for_subject(&self, subject_id: &SubjectId) -> Result<Option<Job>, JobStoreError>;

    /// Pending jobs in selection order (priority desc, created_at asc).
    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Number of jobs currently `processing`.
    async fn count_processing(&self) -> Result<usize, JobStoreError>;

    /// Atomic conditional write: apply `update` only if the job is currently
    /// in `expected` (and, for claims, still has attempts left).
    ///
    /// Returns the updated job, or `None` when nothing matched. Reviving a
    /// job while its subject already has another active one fails with
    /// [`JobStoreError::Duplicate`].
    async fn update_status(
        &self,
        id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Reset `processing` jobs whose `started_at` is before `started_before`.
    ///
    /// Jobs with attempts left go back to `pending` (attempts untouched);
    /// jobs without attempts left become `failed` with [`ABANDONED_MESSAGE`].
    async fn recover_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Counts by status for jobs created at or after `since`.
    ///
    /// With `requested_by` set, only that principal's jobs are counted.
    async fn count_by_status(
        &self,
        since: DateTime<Utc>,
        requested_by: Option<PrincipalId>,
    ) -> Result<StatusCounts, JobStoreError>;

    /// Number of pending jobs that would be selected before `job`.
    async fn pending_ahead_of(&self, job: &Job) -> Result<usize, JobStoreError>;

    /// Delete every `failed` job. Returns how many were removed.
    async fn purge_failed(&self) -> Result<u64, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("subject {subject_id} already has an active job: {existing}")]
    Duplicate { subject_id: SubjectId, existing: JobId },
    #[error("corrupt job row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    last_created_at: Option<DateTime<Utc>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Overwrite a job as-is. Test helper for staging states directly.
    pub fn put(&self, job: Job) -> Result<(), JobStoreError> {
        self.write()?.jobs.insert(job.id, job);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, JobStoreError> {
        self.inner
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, JobStoreError> {
        self.inner
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        let mut inner = self.write()?;

        if let Some(existing) = inner
            .jobs
            .values()
            .find(|j| j.subject_id == new_job.subject_id && j.status.is_active())
        {
            return Err(JobStoreError::Duplicate {
                subject_id: new_job.subject_id,
                existing: existing.id,
            });
        }

        // Strictly increasing creation times keep FIFO order deterministic
        // even when two inserts land on the same clock reading.
        let mut now = Utc::now();
        if let Some(last) = inner.last_created_at {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        inner.last_created_at = Some(now);

        let job = Job::new(new_job, now);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        self.read()?
            .jobs
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn active_for_subject(&self, subject_id: &SubjectId) -> Result<Option<Job>, JobStoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .find(|j| &j.subject_id == subject_id && j.status.is_active())
            .cloned())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.read()?;
        let mut pending: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(Job::selection_order);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_processing(&self) -> Result<usize, JobStoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count())
    }

    async fn update_status(
        &self,
        id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.write()?;

        let Some(job) = inner.jobs.get(&id) else {
            return Ok(None);
        };
        if !job.accepts(expected, &update) {
            return Ok(None);
        }

        // Reviving an inactive job must not create a second active one.
        if !expected.is_active() && update.status.is_active() {
            let subject_id = job.subject_id.clone();
            if let Some(other) = inner
                .jobs
                .values()
                .find(|j| j.id != id && j.subject_id == subject_id && j.status.is_active())
            {
                return Err(JobStoreError::Duplicate {
                    subject_id,
                    existing: other.id,
                });
            }
        }

        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(JobStoreError::NotFound(id))?;
        job.apply(&update);
        Ok(Some(job.clone()))
    }

    async fn recover_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let mut inner = self.write()?;
        let mut recovered = Vec::new();

        for job in inner.jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.started_at.is_some_and(|t| t < started_before);
            if !stale {
                continue;
            }

            if job.has_attempts_left() {
                job.apply(&StatusUpdate::recover(now));
            } else {
                job.apply(&StatusUpdate::fail(ABANDONED_MESSAGE, now));
            }
            recovered.push(job.clone());
        }

        recovered.sort_by(Job::selection_order);
        Ok(recovered)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.read()?;
        let mut jobs: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(filter.limit);
        Ok(jobs)
    }

    async fn count_by_status(
        &self,
        since: DateTime<Utc>,
        requested_by: Option<PrincipalId>,
    ) -> Result<StatusCounts, JobStoreError> {
        let inner = self.read()?;
        let mut counts = StatusCounts::default();
        for job in inner
            .jobs
            .values()
            .filter(|j| j.created_at >= since && requested_by.is_none_or(|p| j.requested_by == Some(p)))
        {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn pending_ahead_of(&self, job: &Job) -> Result<usize, JobStoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && Job::selection_order(j, job) == std::cmp::Ordering::Less
            })
            .count())
    }

    async fn purge_failed(&self) -> Result<u64, JobStoreError> {
        let mut inner = self.write()?;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, j| j.status != JobStatus::Failed);
        Ok((before - inner.jobs.len()) as u64)
    }
}
