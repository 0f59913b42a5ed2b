//! Turns a finalized subject into a pending job and kicks off execution.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use gradeflow_auth::AuthContext;
use gradeflow_core::{DomainError, JobId, SubjectId};

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::processor::RunTarget;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, NewJob, Priority};

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job: Job,
    /// `None` when the dispatch attempt itself errored. The job is still
    /// pending and the next tick picks it up.
    pub dispatch: Option<DispatchOutcome>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("subject already has an active job: {existing}")]
    Conflict { existing: JobId },
    #[error(transparent)]
    Store(JobStoreError),
}

impl From<JobStoreError> for SubmitError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::Duplicate { existing, .. } => SubmitError::Conflict { existing },
            other => SubmitError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct Submitter {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    max_attempts: u32,
}

impl Submitter {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher, max_attempts: u32) -> Self {
        Self {
            store,
            dispatcher,
            max_attempts,
        }
    }

    /// Validate, insert `pending`, then try to dispatch immediately.
    ///
    /// A failed dispatch never fails the submission.
    #[instrument(skip(self, ctx), fields(principal_id = %ctx.principal_id()), err)]
    pub async fn submit(&self, raw_subject: &str, ctx: &AuthContext) -> Result<Submission, SubmitError> {
        let subject_id = SubjectId::parse(raw_subject)?;

        // Fast path; the store's uniqueness check still covers races.
        if let Some(existing) = self.store.active_for_subject(&subject_id).await? {
            return Err(SubmitError::Conflict { existing: existing.id });
        }

        let new_job = NewJob::new(subject_id)
            .with_priority(Priority::for_tier(ctx.tier()))
            .with_max_attempts(self.max_attempts)
            .requested_by(ctx.principal_id());
        let job = self.store.create(new_job).await?;

        info!(
            job_id = %job.id,
            subject_id = %job.subject_id,
            priority = job.priority.0,
            "job submitted"
        );

        let dispatch = match self.dispatcher.dispatch(RunTarget::Job(job.id)).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "immediate dispatch failed; left for scheduler tick");
                None
            }
        };

        Ok(Submission { job, dispatch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::JobStatus;
    use gradeflow_auth::RequesterTier;
    use gradeflow_core::PrincipalId;
    use std::time::Duration;

    fn ctx(tier: RequesterTier) -> AuthContext {
        AuthContext::new(PrincipalId::new(), false, tier)
    }

    #[tokio::test]
    async fn submit_creates_pending_job_and_dispatches() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, mut rx) = Dispatcher::channel(4, Duration::from_millis(50));
        let submitter = Submitter::new(store.clone(), dispatcher, 3);
        let caller = ctx(RequesterTier::Standard);

        let submission = submitter.submit("a-1", &caller).await.unwrap();
        assert_eq!(submission.job.status, JobStatus::Pending);
        assert_eq!(submission.job.priority, Priority::STANDARD);
        assert_eq!(submission.job.requested_by, Some(caller.principal_id()));
        assert_eq!(submission.dispatch, Some(DispatchOutcome::Accepted));
        assert_eq!(rx.recv().await, Some(RunTarget::Job(submission.job.id)));
    }

    #[tokio::test]
    async fn privileged_requester_gets_elevated_priority() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, _rx) = Dispatcher::channel(4, Duration::from_millis(50));
        let submitter = Submitter::new(store, dispatcher, 3);

        let submission = submitter
            .submit("a-1", &ctx(RequesterTier::Privileged))
            .await
            .unwrap();
        assert_eq!(submission.job.priority, Priority::ELEVATED);
    }

    #[tokio::test]
    async fn duplicate_and_invalid_subjects_are_rejected() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, _rx) = Dispatcher::channel(4, Duration::from_millis(50));
        let submitter = Submitter::new(store, dispatcher, 3);
        let caller = ctx(RequesterTier::Standard);

        let first = submitter.submit("a-1", &caller).await.unwrap();
        match submitter.submit("a-1", &caller).await {
            Err(SubmitError::Conflict { existing }) => assert_eq!(existing, first.job.id),
            other => panic!("expected conflict, got {other:?}"),
        }

        assert!(matches!(
            submitter.submit("", &caller).await,
            Err(SubmitError::Validation(_))
        ));
        assert!(matches!(
            submitter.submit("has space", &caller).await,
            Err(SubmitError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn closed_dispatcher_does_not_fail_submission() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, rx) = Dispatcher::channel(4, Duration::from_millis(50));
        drop(rx);
        let submitter = Submitter::new(store.clone(), dispatcher, 3);

        let submission = submitter
            .submit("a-1", &ctx(RequesterTier::Standard))
            .await
            .unwrap();
        assert_eq!(submission.dispatch, None);
        assert_eq!(store.get(submission.job.id).await.unwrap().status, JobStatus::Pending);
    }
}
