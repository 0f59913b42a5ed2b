//! Core job types and the status transition graph.

use core::str::FromStr;
use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gradeflow_auth::RequesterTier;
use gradeflow_core::{DomainError, JobId, PrincipalId, SubjectId};

/// Job lifecycle status.
///
/// ```text
///            claim              complete
/// pending ─────────► processing ─────────► completed
///   │  ▲                │  │
///   │  └─── requeue ────┘  │ fail (attempts exhausted)
///   │       zombie sweep   ▼
///   │                    failed ── manual retry ──► pending
///   └── cancel ──► cancelled
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by exactly one execution context
    Processing,
    /// Feedback generated and persisted
    Completed,
    /// Attempts exhausted (terminal until an operator retries it)
    Failed,
    /// Withdrawn before it was claimed
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or processing. At most one active job exists per subject.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Scheduling priority. Higher is served first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const STANDARD: Priority = Priority(5);
    pub const ELEVATED: Priority = Priority(10);

    pub fn for_tier(tier: RequesterTier) -> Self {
        match tier {
            RequesterTier::Standard => Self::STANDARD,
            RequesterTier::Privileged => Self::ELEVATED,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Parameters for inserting a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub subject_id: SubjectId,
    pub priority: Priority,
    pub max_attempts: u32,
    pub requested_by: Option<PrincipalId>,
}

impl NewJob {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            priority: Priority::STANDARD,
            max_attempts: 3,
            requested_by: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn requested_by(mut self, principal: PrincipalId) -> Self {
        self.requested_by = Some(principal);
        self
    }
}

/// A feedback-generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub subject_id: SubjectId,
    pub status: JobStatus,
    pub priority: Priority,
    /// Number of claims so far (one per execution attempt).
    pub attempts: u32,
    pub max_attempts: u32,
    pub requested_by: Option<PrincipalId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `pending` job.
    pub fn new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            subject_id: new_job.subject_id,
            status: JobStatus::Pending,
            priority: new_job.priority,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            requested_by: new_job.requested_by,
            started_at: None,
            completed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether `update` may be applied to this job given the caller's
    /// expected status. Mirrors the `WHERE` clause of the Postgres write.
    pub fn accepts(&self, expected: JobStatus, update: &StatusUpdate) -> bool {
        self.status == expected
            && expected.can_transition_to(update.status)
            && (update.attempts != AttemptsUpdate::Increment || self.has_attempts_left())
            && update.claim.is_none_or(|token| self.claim_token() == Some(token))
    }

    /// Identity of the current claim; `None` unless a claim has set `started_at`.
    pub fn claim_token(&self) -> Option<ClaimToken> {
        self.started_at.map(|started_at| ClaimToken {
            attempts: self.attempts,
            started_at,
        })
    }

    /// Apply a conditional write that has already been accepted.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        match update.attempts {
            AttemptsUpdate::Keep => {}
            AttemptsUpdate::Increment => self.attempts += 1,
            AttemptsUpdate::Reset => self.attempts = 0,
        }
        update.started_at.apply_to(&mut self.started_at);
        update.completed_at.apply_to(&mut self.completed_at);
        update.error_message.apply_to(&mut self.error_message);
        self.updated_at = update.at;
    }

    /// Selection order: priority descending, then oldest first.
    ///
    /// The id (UUIDv7, time ordered) breaks exact timestamp ties so the order
    /// is total.
    pub fn selection_order(a: &Job, b: &Job) -> Ordering {
        (Reverse(a.priority), a.created_at, a.id).cmp(&(Reverse(b.priority), b.created_at, b.id))
    }
}

/// How a nullable column is touched by a [`StatusUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    pub fn apply_to(&self, target: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(v) => *target = Some(v.clone()),
            FieldUpdate::Clear => *target = None,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            FieldUpdate::Keep => "keep",
            FieldUpdate::Set(_) => "set",
            FieldUpdate::Clear => "clear",
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(v) => Some(v),
            _ => None,
        }
    }
}

/// How `attempts` is touched by a [`StatusUpdate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttemptsUpdate {
    Keep,
    /// Only applies while `attempts < max_attempts`.
    Increment,
    Reset,
}

impl AttemptsUpdate {
    pub fn mode(&self) -> &'static str {
        match self {
            AttemptsUpdate::Keep => "keep",
            AttemptsUpdate::Increment => "increment",
            AttemptsUpdate::Reset => "reset",
        }
    }
}

/// Identifies one claim of a job: the attempt number and its start time.
///
/// A claim always sets a fresh `started_at` and bumps `attempts`, so a job
/// recovered and claimed again never carries the same token.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

/// A single conditional write against a job row.
///
/// Built through the named constructors, one per edge of the status graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub attempts: AttemptsUpdate,
    pub started_at: FieldUpdate<DateTime<Utc>>,
    pub completed_at: FieldUpdate<DateTime<Utc>>,
    pub error_message: FieldUpdate<String>,
    /// When set, the write only applies to the claim with this token.
    pub claim: Option<ClaimToken>,
    /// Write time, stored as `updated_at`.
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    fn to(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            attempts: AttemptsUpdate::Keep,
            started_at: FieldUpdate::Keep,
            completed_at: FieldUpdate::Keep,
            error_message: FieldUpdate::Keep,
            claim: None,
            at,
        }
    }

    /// Restrict this write to the claim `job` was handed by the claim protocol.
    pub fn held_by(mut self, job: &Job) -> Self {
        self.claim = job.claim_token();
        self
    }

    /// pending → processing: `started_at = now, attempts += 1`.
    pub fn claim(now: DateTime<Utc>) -> Self {
        Self {
            attempts: AttemptsUpdate::Increment,
            started_at: FieldUpdate::Set(now),
            ..Self::to(JobStatus::Processing, now)
        }
    }

    /// processing → completed.
    pub fn complete(now: DateTime<Utc>) -> Self {
        Self {
            completed_at: FieldUpdate::Set(now),
            error_message: FieldUpdate::Clear,
            ..Self::to(JobStatus::Completed, now)
        }
    }

    /// processing → pending after a failed attempt with attempts left.
    pub fn requeue(cause: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            started_at: FieldUpdate::Clear,
            error_message: FieldUpdate::Set(cause.into()),
            ..Self::to(JobStatus::Pending, now)
        }
    }

    /// processing → failed once attempts are exhausted.
    pub fn fail(cause: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            completed_at: FieldUpdate::Set(now),
            error_message: FieldUpdate::Set(cause.into()),
            ..Self::to(JobStatus::Failed, now)
        }
    }

    /// processing → pending for an abandoned job. Attempts are untouched.
    pub fn recover(now: DateTime<Utc>) -> Self {
        Self {
            started_at: FieldUpdate::Clear,
            ..Self::to(JobStatus::Pending, now)
        }
    }

    /// failed → pending, operator-triggered. Resets the attempt budget.
    pub fn manual_retry(now: DateTime<Utc>) -> Self {
        Self {
            attempts: AttemptsUpdate::Reset,
            started_at: FieldUpdate::Clear,
            completed_at: FieldUpdate::Clear,
            error_message: FieldUpdate::Clear,
            ..Self::to(JobStatus::Pending, now)
        }
    }

    /// pending → cancelled.
    pub fn cancel(now: DateTime<Utc>) -> Self {
        Self {
            completed_at: FieldUpdate::Set(now),
            ..Self::to(JobStatus::Cancelled, now)
        }
    }
}

/// Filter for listing jobs (newest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub subject_id: Option<SubjectId>,
    pub requested_by: Option<PrincipalId>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            subject_id: None,
            requested_by: None,
            limit: 50,
        }
    }
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.subject_id.as_ref().is_none_or(|s| &job.subject_id == s)
            && self.requested_by.is_none_or(|p| job.requested_by == Some(p))
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subject(s: &str) -> SubjectId {
        SubjectId::parse(s).unwrap()
    }

    #[test]
    fn transition_graph_matches_lifecycle() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn writes_off_the_transition_graph_are_rejected() {
        let t0 = Utc::now();
        let mut job = Job::new(NewJob::new(subject("a-1")), t0);
        job.apply(&StatusUpdate::claim(t0));
        job.apply(&StatusUpdate::complete(t0));

        assert!(!job.accepts(JobStatus::Completed, &StatusUpdate::claim(t0)));
        assert!(!job.accepts(JobStatus::Completed, &StatusUpdate::manual_retry(t0)));
    }

    #[test]
    fn held_write_only_matches_its_own_claim() {
        let t0 = Utc::now();
        let mut job = Job::new(NewJob::new(subject("a-1")), t0);
        job.apply(&StatusUpdate::claim(t0));
        let first_claim = job.clone();

        // Recovered, then claimed again by someone else.
        job.apply(&StatusUpdate::recover(t0 + Duration::seconds(300)));
        job.apply(&StatusUpdate::claim(t0 + Duration::seconds(301)));
        assert_eq!(job.status, JobStatus::Processing);

        let stale = StatusUpdate::complete(t0 + Duration::seconds(302)).held_by(&first_claim);
        assert!(!job.accepts(JobStatus::Processing, &stale));

        let current = StatusUpdate::complete(t0 + Duration::seconds(302)).held_by(&job);
        assert!(job.accepts(JobStatus::Processing, &current));
    }

    #[test]
    fn status_parses_from_wire_names() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn priority_follows_tier() {
        assert_eq!(Priority::for_tier(RequesterTier::Standard), Priority(5));
        assert_eq!(Priority::for_tier(RequesterTier::Privileged), Priority(10));
    }

    #[test]
    fn claim_then_requeue_then_fail_lifecycle() {
        let t0 = Utc::now();
        let mut job = Job::new(NewJob::new(subject("a-1")).with_max_attempts(2), t0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        let claim = StatusUpdate::claim(t0);
        assert!(job.accepts(JobStatus::Pending, &claim));
        job.apply(&claim);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.started_at, Some(t0));

        job.apply(&StatusUpdate::requeue("timeout", t0));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.started_at, None);
        assert_eq!(job.error_message.as_deref(), Some("timeout"));

        let t1 = t0 + Duration::seconds(1);
        job.apply(&StatusUpdate::claim(t1));
        assert_eq!(job.attempts, 2);
        assert!(!job.has_attempts_left());

        job.apply(&StatusUpdate::fail("boom", t1));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(t1));
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn claim_is_refused_once_attempts_are_exhausted() {
        let now = Utc::now();
        let mut job = Job::new(NewJob::new(subject("a-1")).with_max_attempts(1), now);
        job.apply(&StatusUpdate::claim(now));
        job.apply(&StatusUpdate::recover(now));

        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.accepts(JobStatus::Pending, &StatusUpdate::claim(now)));
    }

    #[test]
    fn manual_retry_resets_budget_and_error() {
        let now = Utc::now();
        let mut job = Job::new(NewJob::new(subject("a-1")).with_max_attempts(1), now);
        job.apply(&StatusUpdate::claim(now));
        job.apply(&StatusUpdate::fail("boom", now));

        job.apply(&StatusUpdate::manual_retry(now));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.error_message, None);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.started_at, None);
    }

    #[test]
    fn selection_order_prefers_priority_then_age() {
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);
        let old_low = Job::new(NewJob::new(subject("a")).with_priority(Priority(5)), t1);
        let new_high = Job::new(NewJob::new(subject("b")).with_priority(Priority(10)), t2);
        let new_low = Job::new(NewJob::new(subject("c")).with_priority(Priority(5)), t2);

        let mut jobs = vec![new_low.clone(), old_low.clone(), new_high.clone()];
        jobs.sort_by(Job::selection_order);
        let order: Vec<_> = jobs.iter().map(|j| j.subject_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn filter_matches_all_given_fields() {
        let owner = PrincipalId::new();
        let job = Job::new(NewJob::new(subject("a-1")).requested_by(owner), Utc::now());

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter {
            status: Some(JobStatus::Pending),
            subject_id: Some(subject("a-1")),
            requested_by: Some(owner),
            ..Default::default()
        }
        .matches(&job));
        assert!(!JobFilter {
            requested_by: Some(PrincipalId::new()),
            ..Default::default()
        }
        .matches(&job));
    }
}
