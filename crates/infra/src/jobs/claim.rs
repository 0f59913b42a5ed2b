//! Concurrency gate, priority selection and the claim protocol.
//!
//! A claim is the conditional write `pending -> processing` with
//! `attempts += 1`. Losing the race is an ordinary outcome
//! ([`ClaimOutcome::AlreadyHandled`]), never an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use gradeflow_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus, StatusUpdate};

/// How many pending candidates `claim_next` looks at before giving up.
pub const CANDIDATE_WINDOW: usize = 16;

/// Soft cap on simultaneously processing jobs.
///
/// The check is read-then-decide: two contexts can both observe one slot of
/// headroom. Individual claims stay atomic; the cap may briefly overshoot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGate {
    cap: usize,
}

impl ConcurrencyGate {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// `cap - processing`, saturating at zero.
    pub async fn headroom(&self, store: &dyn JobStore) -> Result<usize, JobStoreError> {
        let processing = store.count_processing().await?;
        Ok(self.cap.saturating_sub(processing))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This context now owns the job.
    Claimed(Job),
    /// The job was not `pending` (or had no attempts left) at write time.
    AlreadyHandled,
    /// No headroom; nothing was written.
    AtCapacity,
    /// No pending job could be claimed.
    NothingPending,
}

/// Claims jobs against a store, honouring the gate.
#[derive(Clone)]
pub struct Claimer {
    store: Arc<dyn JobStore>,
    gate: ConcurrencyGate,
}

impl Claimer {
    pub fn new(store: Arc<dyn JobStore>, gate: ConcurrencyGate) -> Self {
        Self { store, gate }
    }

    pub fn gate(&self) -> ConcurrencyGate {
        self.gate
    }

    /// Claim a specific job if there is headroom.
    pub async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<ClaimOutcome, JobStoreError> {
        if self.gate.headroom(self.store.as_ref()).await? == 0 {
            debug!(job_id = %id, "at capacity, leaving job pending");
            return Ok(ClaimOutcome::AtCapacity);
        }
        claim(self.store.as_ref(), id, now).await
    }

    /// Claim the best pending job (priority desc, oldest first) if there is headroom.
    ///
    /// Walks the candidate window and returns the first claim that wins.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<ClaimOutcome, JobStoreError> {
        if self.gate.headroom(self.store.as_ref()).await? == 0 {
            debug!("at capacity, not selecting");
            return Ok(ClaimOutcome::AtCapacity);
        }

        for candidate in self.store.list_pending(CANDIDATE_WINDOW).await? {
            if let ClaimOutcome::Claimed(job) = claim(self.store.as_ref(), candidate.id, now).await? {
                return Ok(ClaimOutcome::Claimed(job));
            }
        }
        Ok(ClaimOutcome::NothingPending)
    }
}

/// The atomic claim write. No gate check.
pub async fn claim(store: &dyn JobStore, id: JobId, now: DateTime<Utc>) -> Result<ClaimOutcome, JobStoreError> {
    match store
        .update_status(id, JobStatus::Pending, StatusUpdate::claim(now))
        .await?
    {
        Some(job) => {
            info!(
                job_id = %job.id,
                subject_id = %job.subject_id,
                attempts = job.attempts,
                "job claimed"
            );
            Ok(ClaimOutcome::Claimed(job))
        }
        None => {
            debug!(job_id = %id, "claim lost, job already handled");
            Ok(ClaimOutcome::AlreadyHandled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{NewJob, Priority};
    use gradeflow_core::SubjectId;

    fn new_job(s: &str) -> NewJob {
        NewJob::new(SubjectId::parse(s).unwrap())
    }

    #[tokio::test]
    async fn headroom_saturates_at_zero() {
        let store = InMemoryJobStore::new();
        for s in ["a", "b", "c"] {
            let job = store.create(new_job(s)).await.unwrap();
            claim(&store, job.id, Utc::now()).await.unwrap();
        }

        assert_eq!(ConcurrencyGate::new(5).headroom(&store).await.unwrap(), 2);
        assert_eq!(ConcurrencyGate::new(2).headroom(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_claim_of_same_job_is_already_handled() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("a-1")).await.unwrap();

        let first = claim(&store, job.id, Utc::now()).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(ref j) if j.attempts == 1));

        let second = claim(&store, job.id, Utc::now()).await.unwrap();
        assert_eq!(second, ClaimOutcome::AlreadyHandled);
        assert_eq!(store.get(job.id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn claim_next_takes_highest_priority_and_respects_gate() {
        let store = Arc::new(InMemoryJobStore::new());
        store.create(new_job("low")).await.unwrap();
        let high = store
            .create(new_job("high").with_priority(Priority::ELEVATED))
            .await
            .unwrap();

        let claimer = Claimer::new(store.clone(), ConcurrencyGate::new(1));
        match claimer.claim_next(Utc::now()).await.unwrap() {
            ClaimOutcome::Claimed(job) => assert_eq!(job.id, high.id),
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(claimer.claim_next(Utc::now()).await.unwrap(), ClaimOutcome::AtCapacity);
    }

    #[tokio::test]
    async fn claim_next_with_empty_queue() {
        let store = Arc::new(InMemoryJobStore::new());
        let claimer = Claimer::new(store, ConcurrencyGate::new(3));
        assert_eq!(claimer.claim_next(Utc::now()).await.unwrap(), ClaimOutcome::NothingPending);
    }
}
