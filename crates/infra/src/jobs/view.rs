//! Requester-facing queue estimates.

use std::time::Duration;

use serde::Serialize;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueEstimate {
    /// 1-based position among pending jobs in selection order.
    pub position: usize,
    pub estimated_wait_secs: u64,
}

/// Estimate when a pending job will start.
///
/// Each full batch of `cap` jobs ahead of this one is assumed to take
/// `per_job`. Returns `None` for jobs that are not pending.
pub async fn queue_estimate(
    store: &dyn JobStore,
    job: &Job,
    cap: usize,
    per_job: Duration,
) -> Result<Option<QueueEstimate>, JobStoreError> {
    if job.status != JobStatus::Pending {
        return Ok(None);
    }

    let ahead = store.pending_ahead_of(job).await?;
    let batches = (ahead / cap.max(1)) as u64;
    Ok(Some(QueueEstimate {
        position: ahead + 1,
        estimated_wait_secs: batches * per_job.as_secs(),
    }))
}
