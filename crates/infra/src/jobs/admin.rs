//! Operator actions: manual retry, cancel, bulk purge.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use gradeflow_auth::AuthContext;
use gradeflow_core::JobId;

use super::dispatcher::Dispatcher;
use super::processor::RunTarget;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus, StatusUpdate};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("not allowed to {action} this job")]
    Forbidden { action: &'static str },
    #[error("cannot {action} job {job_id} in status {current}")]
    InvalidState {
        job_id: JobId,
        current: JobStatus,
        action: &'static str,
    },
    #[error("subject already has an active job: {existing}")]
    Conflict { existing: JobId },
    #[error(transparent)]
    Store(JobStoreError),
}

impl From<JobStoreError> for AdminError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => AdminError::NotFound(id),
            JobStoreError::Duplicate { existing, .. } => AdminError::Conflict { existing },
            other => AdminError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct JobAdmin {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
}

impl JobAdmin {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// `failed -> pending` with a fresh attempt budget, then best-effort dispatch.
    #[instrument(skip(self, ctx), err)]
    pub async fn retry(&self, id: JobId, ctx: &AuthContext) -> Result<Job, AdminError> {
        if !ctx.is_admin() {
            return Err(AdminError::Forbidden { action: "retry" });
        }

        let job = self
            .transition(id, JobStatus::Failed, StatusUpdate::manual_retry(Utc::now()), "retry")
            .await?;
        info!(job_id = %job.id, subject_id = %job.subject_id, "job manually retried");

        if let Err(e) = self.dispatcher.dispatch(RunTarget::Job(job.id)).await {
            warn!(job_id = %job.id, error = %e, "dispatch after retry failed; left for scheduler tick");
        }
        Ok(job)
    }

    /// `pending -> cancelled`. Allowed to the requester or an admin.
    #[instrument(skip(self, ctx), err)]
    pub async fn cancel(&self, id: JobId, ctx: &AuthContext) -> Result<Job, AdminError> {
        let job = self.store.get(id).await?;
        if !ctx.can_access(job.requested_by) {
            return Err(AdminError::Forbidden { action: "cancel" });
        }

        let job = self
            .transition(id, JobStatus::Pending, StatusUpdate::cancel(Utc::now()), "cancel")
            .await?;
        info!(job_id = %job.id, subject_id = %job.subject_id, "job cancelled");
        Ok(job)
    }

    /// Delete every `failed` job.
    #[instrument(skip(self, ctx), err)]
    pub async fn purge_failed(&self, ctx: &AuthContext) -> Result<u64, AdminError> {
        if !ctx.is_admin() {
            return Err(AdminError::Forbidden { action: "purge" });
        }
        let purged = self.store.purge_failed().await?;
        info!(purged, "failed jobs purged");
        Ok(purged)
    }

    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
        action: &'static str,
    ) -> Result<Job, AdminError> {
        if let Some(job) = self.store.update_status(id, expected, update).await? {
            return Ok(job);
        }

        // Zero rows: report what the job actually is now.
        let current = self.store.get(id).await?;
        Err(AdminError::InvalidState {
            job_id: id,
            current: current.status,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::claim::claim;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewJob;
    use gradeflow_auth::RequesterTier;
    use gradeflow_core::{PrincipalId, SubjectId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn admin() -> AuthContext {
        AuthContext::new(PrincipalId::new(), true, RequesterTier::Privileged)
    }

    fn user() -> AuthContext {
        AuthContext::new(PrincipalId::new(), false, RequesterTier::Standard)
    }

    fn setup() -> (Arc<InMemoryJobStore>, JobAdmin, mpsc::Receiver<RunTarget>) {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, rx) = Dispatcher::channel(8, Duration::from_millis(20));
        (store.clone(), JobAdmin::new(store, dispatcher), rx)
    }

    async fn failed_job(store: &InMemoryJobStore, subject: &str) -> Job {
        let job = store
            .create(NewJob::new(SubjectId::parse(subject).unwrap()).with_max_attempts(1))
            .await
            .unwrap();
        claim(store, job.id, Utc::now()).await.unwrap();
        store
            .update_status(job.id, JobStatus::Processing, StatusUpdate::fail("boom", Utc::now()))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn retry_resets_failed_job() {
        let (store, admin_ops, _rx) = setup();
        let job = failed_job(&store, "a-1").await;

        let retried = admin_ops.retry(job.id, &admin()).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempts, 0);
        assert_eq!(retried.error_message, None);
    }

    #[tokio::test]
    async fn retry_requires_admin_and_failed_status() {
        let (store, admin_ops, _rx) = setup();
        let job = store
            .create(NewJob::new(SubjectId::parse("a-1").unwrap()))
            .await
            .unwrap();

        assert!(matches!(
            admin_ops.retry(job.id, &user()).await,
            Err(AdminError::Forbidden { .. })
        ));
        match admin_ops.retry(job.id, &admin()).await {
            Err(AdminError::InvalidState { current, .. }) => assert_eq!(current, JobStatus::Pending),
            other => panic!("expected invalid state, got {other:?}"),
        }
        assert!(matches!(
            admin_ops.retry(JobId::new(), &admin()).await,
            Err(AdminError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn retry_conflicts_with_newer_active_job() {
        let (store, admin_ops, _rx) = setup();
        let job = failed_job(&store, "a-1").await;
        let newer = store
            .create(NewJob::new(SubjectId::parse("a-1").unwrap()))
            .await
            .unwrap();

        match admin_ops.retry(job.id, &admin()).await {
            Err(AdminError::Conflict { existing }) => assert_eq!(existing, newer.id),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_only_from_pending_and_only_by_owner_or_admin() {
        let (store, admin_ops, _rx) = setup();
        let owner = user();
        let job = store
            .create(NewJob::new(SubjectId::parse("a-1").unwrap()).requested_by(owner.principal_id()))
            .await
            .unwrap();

        assert!(matches!(
            admin_ops.cancel(job.id, &user()).await,
            Err(AdminError::Forbidden { .. })
        ));

        let cancelled = admin_ops.cancel(job.id, &owner).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        match admin_ops.cancel(job.id, &admin()).await {
            Err(AdminError::InvalidState { current, .. }) => assert_eq!(current, JobStatus::Cancelled),
            other => panic!("expected invalid state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn purge_removes_only_failed_jobs() {
        let (store, admin_ops, _rx) = setup();
        failed_job(&store, "a-1").await;
        failed_job(&store, "a-2").await;
        let pending = store
            .create(NewJob::new(SubjectId::parse("a-3").unwrap()))
            .await
            .unwrap();

        assert!(matches!(
            admin_ops.purge_failed(&user()).await,
            Err(AdminError::Forbidden { .. })
        ));
        assert_eq!(admin_ops.purge_failed(&admin()).await.unwrap(), 2);
        assert!(store.get(pending.id).await.is_ok());
    }
}
