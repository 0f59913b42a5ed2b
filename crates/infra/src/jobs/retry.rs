//! What happens to a job after a failed attempt.
//!
//! Every failure is treated the same: requeue immediately while attempts
//! remain, otherwise fail terminally. No backoff.

use chrono::{DateTime, Utc};

use super::types::{Job, StatusUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to `pending`; the next claim is attempt `attempts + 1`.
    Requeue,
    /// Terminal `failed`.
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn disposition(&self, job: &Job) -> FailureDisposition {
        if job.has_attempts_left() {
            FailureDisposition::Requeue
        } else {
            FailureDisposition::Fail
        }
    }

    /// The finalizing write for a failed attempt of `job` (currently `processing`).
    pub fn failure_update(
        &self,
        job: &Job,
        cause: impl Into<String>,
        now: DateTime<Utc>,
    ) -> (FailureDisposition, StatusUpdate) {
        let disposition = self.disposition(job);
        let update = match disposition {
            FailureDisposition::Requeue => StatusUpdate::requeue(cause, now),
            FailureDisposition::Fail => StatusUpdate::fail(cause, now),
        };
        (disposition, update)
    }
}
