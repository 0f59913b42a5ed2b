//! Executes one claimed job end to end.
//!
//! ```text
//! run(target) ── gate ── claim ── process(job)
//!                                   │
//!                 generate (timeout) ┼─ ok ── save result ── complete
//!                                   └─ err ── requeue | fail
//! ```
//!
//! The finalizing write is conditional on `processing` and on the claim this
//! context holds (attempt number and `started_at`). If it matches zero rows
//! the job was recovered by the zombie sweep while we were generating, and
//! possibly claimed again by another context. The outcome is
//! [`ProcessOutcome::Superseded`]; feedback saved for the lost claim is
//! discarded and nothing else is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use gradeflow_ai::{FeedbackGenerator, GenerationRequest};
use gradeflow_core::JobId;

use super::claim::{ClaimOutcome, Claimer, ConcurrencyGate};
use super::retry::{FailureDisposition, RetryPolicy};
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus, StatusUpdate};
use crate::results::FeedbackStore;

/// What a processor run should pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "job_id", rename_all = "snake_case")]
pub enum RunTarget {
    /// A specific job (submitter, tick, admin retry).
    Job(JobId),
    /// Whatever the selector ranks first.
    NextPending,
}

impl From<Option<JobId>> for RunTarget {
    fn from(id: Option<JobId>) -> Self {
        id.map_or(RunTarget::NextPending, RunTarget::Job)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    AtCapacity,
    AlreadyHandled,
    NothingPending,
    Completed(Job),
    /// Failed attempt with attempts left; back to `pending`.
    Requeued(Job),
    /// Failed attempt with attempts exhausted.
    Failed(Job),
    /// The job left `processing` under us (zombie-recovered).
    Superseded(JobId),
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::AtCapacity => "at_capacity",
            ProcessOutcome::AlreadyHandled => "already_handled",
            ProcessOutcome::NothingPending => "nothing_pending",
            ProcessOutcome::Completed(_) => "completed",
            ProcessOutcome::Requeued(_) => "requeued",
            ProcessOutcome::Failed(_) => "failed",
            ProcessOutcome::Superseded(_) => "superseded",
        }
    }
}

/// Infrastructure failure while running a job. The job itself is left as the
/// store last saw it (possibly `processing`, which the zombie sweep repairs).
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn JobStore>,
    results: Arc<dyn FeedbackStore>,
    generator: Arc<dyn FeedbackGenerator>,
    claimer: Claimer,
    retry: RetryPolicy,
    generation_timeout: Duration,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        results: Arc<dyn FeedbackStore>,
        generator: Arc<dyn FeedbackGenerator>,
        gate: ConcurrencyGate,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            claimer: Claimer::new(store.clone(), gate),
            store,
            results,
            generator,
            retry: RetryPolicy,
            generation_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn gate(&self) -> ConcurrencyGate {
        self.claimer.gate()
    }

    /// Gate check, claim, then process.
    #[instrument(skip(self), fields(target = ?target), err)]
    pub async fn run(&self, target: RunTarget) -> Result<ProcessOutcome, ProcessorError> {
        let now = Utc::now();
        let claimed = match target {
            RunTarget::Job(id) => self.claimer.claim_job(id, now).await?,
            RunTarget::NextPending => self.claimer.claim_next(now).await?,
        };

        match claimed {
            ClaimOutcome::Claimed(job) => self.process(job).await,
            ClaimOutcome::AlreadyHandled => Ok(ProcessOutcome::AlreadyHandled),
            ClaimOutcome::AtCapacity => Ok(ProcessOutcome::AtCapacity),
            ClaimOutcome::NothingPending => Ok(ProcessOutcome::NothingPending),
        }
    }

    /// Generate, persist and finalize a job this context has claimed.
    pub async fn process(&self, job: Job) -> Result<ProcessOutcome, ProcessorError> {
        let request = GenerationRequest {
            job_id: job.id,
            subject_id: job.subject_id.clone(),
            attempt: job.attempts,
        };
        let claimed_at = job.started_at.unwrap_or(job.updated_at);

        let generated = tokio::time::timeout(self.generation_timeout, self.generator.generate(&request)).await;

        let cause = match generated {
            Ok(Ok(feedback)) => {
                match self
                    .results
                    .save(job.id, &job.subject_id, &feedback, claimed_at, Utc::now())
                    .await
                {
                    Ok(Some(record)) => return self.complete(job, record.version, claimed_at).await,
                    Ok(None) => {
                        warn!(job_id = %job.id, "newer claim already saved feedback; superseded");
                        return Ok(ProcessOutcome::Superseded(job.id));
                    }
                    Err(e) => format!("failed to persist feedback: {e}"),
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "generation timed out after {}s",
                self.generation_timeout.as_secs()
            ),
        };

        self.fail_attempt(job, cause).await
    }

    async fn complete(
        &self,
        job: Job,
        version: u32,
        claimed_at: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let update = StatusUpdate::complete(Utc::now()).held_by(&job);
        match self.store.update_status(job.id, JobStatus::Processing, update).await? {
            Some(done) => {
                info!(
                    job_id = %done.id,
                    subject_id = %done.subject_id,
                    attempts = done.attempts,
                    version,
                    "job completed"
                );
                Ok(ProcessOutcome::Completed(done))
            }
            None => {
                warn!(job_id = %job.id, "claim lost before completion; superseded");
                if let Err(e) = self.results.discard(job.id, claimed_at).await {
                    error!(job_id = %job.id, error = %e, "failed to discard superseded feedback");
                }
                Ok(ProcessOutcome::Superseded(job.id))
            }
        }
    }

    async fn fail_attempt(&self, job: Job, cause: String) -> Result<ProcessOutcome, ProcessorError> {
        let (disposition, update) = self.retry.failure_update(&job, cause.clone(), Utc::now());

        let Some(updated) = self
            .store
            .update_status(job.id, JobStatus::Processing, update.held_by(&job))
            .await?
        else {
            warn!(job_id = %job.id, %cause, "claim lost before failure was recorded; superseded");
            return Ok(ProcessOutcome::Superseded(job.id));
        };

        match disposition {
            FailureDisposition::Requeue => {
                warn!(
                    job_id = %updated.id,
                    subject_id = %updated.subject_id,
                    attempts = updated.attempts,
                    max_attempts = updated.max_attempts,
                    %cause,
                    "attempt failed, job requeued"
                );
                Ok(ProcessOutcome::Requeued(updated))
            }
            FailureDisposition::Fail => {
                error!(
                    job_id = %updated.id,
                    subject_id = %updated.subject_id,
                    attempts = updated.attempts,
                    %cause,
                    "attempts exhausted, job failed"
                );
                Ok(ProcessOutcome::Failed(updated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::claim::claim;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewJob;
    use crate::results::InMemoryFeedbackStore;
    use gradeflow_ai::{Feedback, ScriptedGenerator, ScriptedReply};
    use gradeflow_core::SubjectId;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        results: Arc<InMemoryFeedbackStore>,
        processor: Processor,
    }

    fn fixture(generator: ScriptedGenerator, timeout: Duration) -> Fixture {
        let store = Arc::new(InMemoryJobStore::new());
        let results = Arc::new(InMemoryFeedbackStore::new());
        let processor = Processor::new(
            store.clone(),
            results.clone(),
            Arc::new(generator),
            ConcurrencyGate::new(5),
            timeout,
        );
        Fixture { store, results, processor }
    }

    fn new_job(max_attempts: u32) -> NewJob {
        NewJob::new(SubjectId::parse("a-1").unwrap()).with_max_attempts(max_attempts)
    }

    #[tokio::test]
    async fn success_persists_feedback_and_completes() {
        let f = fixture(ScriptedGenerator::succeeding(), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();

        let outcome = f.processor.run(RunTarget::Job(job.id)).await.unwrap();
        let ProcessOutcome::Completed(done) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 1);
        assert!(done.completed_at.is_some());

        let record = f.results.for_job(job.id).await.unwrap().unwrap();
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn failure_with_attempts_left_requeues_without_result() {
        let f = fixture(ScriptedGenerator::failing("model overloaded"), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();

        let outcome = f.processor.run(RunTarget::NextPending).await.unwrap();
        let ProcessOutcome::Requeued(requeued) = outcome else {
            panic!("expected requeue, got {outcome:?}");
        };
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempts, 1);
        assert_eq!(requeued.started_at, None);
        assert!(requeued.error_message.unwrap().contains("model overloaded"));
        assert!(f.results.for_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn timeout_counts_as_a_failed_attempt() {
        let generator = ScriptedGenerator::succeeding()
            .then(ScriptedReply::Delay(Duration::from_secs(60), Feedback::new("late")));
        let f = fixture(generator, Duration::from_millis(20));
        let job = f.store.create(new_job(1)).await.unwrap();

        let outcome = f.processor.run(RunTarget::Job(job.id)).await.unwrap();
        let ProcessOutcome::Failed(failed) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(failed.error_message.unwrap().contains("timed out"));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn finalize_after_zombie_recovery_is_superseded() {
        let f = fixture(ScriptedGenerator::succeeding(), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();

        let claimed = match f.processor.claimer.claim_job(job.id, Utc::now()).await.unwrap() {
            ClaimOutcome::Claimed(j) => j,
            other => panic!("expected claim, got {other:?}"),
        };
        f.store
            .update_status(job.id, JobStatus::Processing, StatusUpdate::recover(Utc::now()))
            .await
            .unwrap()
            .unwrap();

        let outcome = f.processor.process(claimed).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Superseded(job.id));
        assert_eq!(f.store.get(job.id).await.unwrap().status, JobStatus::Pending);
        assert!(f.results.for_job(job.id).await.unwrap().is_none());
    }

    /// Claim, recover, and let a second context claim the job again.
    async fn reclaimed(f: &Fixture, job: &Job) -> (Job, Job) {
        let t0 = Utc::now() - chrono::Duration::minutes(10);
        let first = match claim(f.store.as_ref(), job.id, t0).await.unwrap() {
            ClaimOutcome::Claimed(j) => j,
            other => panic!("expected claim, got {other:?}"),
        };
        f.store
            .update_status(job.id, JobStatus::Processing, StatusUpdate::recover(Utc::now()))
            .await
            .unwrap()
            .unwrap();
        let second = match claim(f.store.as_ref(), job.id, Utc::now()).await.unwrap() {
            ClaimOutcome::Claimed(j) => j,
            other => panic!("expected claim, got {other:?}"),
        };
        (first, second)
    }

    #[tokio::test]
    async fn stale_failure_does_not_requeue_a_reclaimed_job() {
        let f = fixture(ScriptedGenerator::failing("model overloaded"), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();
        let (first, _second) = reclaimed(&f, &job).await;

        let outcome = f.processor.process(first).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Superseded(job.id));

        let current = f.store.get(job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert_eq!(current.attempts, 2);
        assert_eq!(
            claim(f.store.as_ref(), job.id, Utc::now()).await.unwrap(),
            ClaimOutcome::AlreadyHandled
        );
    }

    #[tokio::test]
    async fn stale_success_neither_completes_nor_keeps_feedback() {
        let f = fixture(ScriptedGenerator::succeeding(), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();
        let (first, second) = reclaimed(&f, &job).await;

        let outcome = f.processor.process(first).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Superseded(job.id));
        assert_eq!(f.store.get(job.id).await.unwrap().status, JobStatus::Processing);
        assert!(f.results.for_job(job.id).await.unwrap().is_none());

        // The current owner still finishes normally.
        let outcome = f.processor.process(second).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed(ref done) if done.attempts == 2));
        assert_eq!(f.results.for_job(job.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn stale_save_cannot_overwrite_newer_claim_feedback() {
        let generator = ScriptedGenerator::succeeding()
            .then(ScriptedReply::Succeed(Feedback::new("from the current claim")));
        let f = fixture(generator, Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();
        let (first, second) = reclaimed(&f, &job).await;

        let outcome = f.processor.process(second).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed(_)));

        let outcome = f.processor.process(first).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Superseded(job.id));
        let record = f.results.for_job(job.id).await.unwrap().unwrap();
        assert_eq!(record.body, "from the current claim");
    }

    #[tokio::test]
    async fn run_on_non_pending_job_is_already_handled() {
        let f = fixture(ScriptedGenerator::succeeding(), Duration::from_secs(5));
        let job = f.store.create(new_job(3)).await.unwrap();
        f.processor.run(RunTarget::Job(job.id)).await.unwrap();

        let again = f.processor.run(RunTarget::Job(job.id)).await.unwrap();
        assert_eq!(again, ProcessOutcome::AlreadyHandled);
    }

    #[test]
    fn run_target_from_optional_id() {
        let id = JobId::new();
        assert_eq!(RunTarget::from(Some(id)), RunTarget::Job(id));
        assert_eq!(RunTarget::from(None), RunTarget::NextPending);
    }
}
