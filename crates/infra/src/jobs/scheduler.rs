//! Zombie recovery and the periodic scheduler tick.
//!
//! A tick is: sweep stale `processing` jobs, compute headroom, dispatch up to
//! that many pending jobs in selection order. It is driven either by an
//! external cron hitting `POST /scheduler/tick` or by [`spawn_interval`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::claim::ConcurrencyGate;
use super::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
use super::processor::RunTarget;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus};

/// Resets jobs stuck in `processing` past a threshold.
#[derive(Clone)]
pub struct ZombieSweeper {
    store: Arc<dyn JobStore>,
    threshold: Duration,
}

impl ZombieSweeper {
    pub fn new(store: Arc<dyn JobStore>, threshold: Duration) -> Self {
        Self { store, threshold }
    }

    pub async fn sweep(&self) -> Result<Vec<Job>, JobStoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Recover jobs whose `started_at` is older than `now - threshold`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .map_err(|e| JobStoreError::Storage(format!("invalid zombie threshold: {e}")))?;
        let recovered = self.store.recover_stale(now - threshold, now).await?;

        for job in &recovered {
            match job.status {
                JobStatus::Pending => warn!(
                    job_id = %job.id,
                    subject_id = %job.subject_id,
                    attempts = job.attempts,
                    "zombie job recovered to pending"
                ),
                _ => warn!(
                    job_id = %job.id,
                    subject_id = %job.subject_id,
                    attempts = job.attempts,
                    "zombie job had no attempts left, marked failed"
                ),
            }
        }
        Ok(recovered)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Jobs reset from `processing` to `pending`.
    pub recovered: usize,
    /// Zombies with no attempts left, moved to `failed`.
    pub abandoned: usize,
    pub headroom: usize,
    pub dispatched: usize,
    pub deferred: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Clone)]
pub struct SchedulerTick {
    store: Arc<dyn JobStore>,
    sweeper: ZombieSweeper,
    gate: ConcurrencyGate,
    dispatcher: Dispatcher,
}

impl SchedulerTick {
    pub fn new(
        store: Arc<dyn JobStore>,
        sweeper: ZombieSweeper,
        gate: ConcurrencyGate,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            sweeper,
            gate,
            dispatcher,
        }
    }

    pub async fn tick(&self) -> Result<TickReport, TickError> {
        self.tick_at(Utc::now()).await
    }

    #[instrument(skip(self), err)]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let mut report = TickReport::default();

        for job in self.sweeper.sweep_at(now).await? {
            if job.status == JobStatus::Pending {
                report.recovered += 1;
            } else {
                report.abandoned += 1;
            }
        }

        report.headroom = self.gate.headroom(self.store.as_ref()).await?;
        if report.headroom > 0 {
            for job in self.store.list_pending(report.headroom).await? {
                match self.dispatcher.dispatch(RunTarget::Job(job.id)).await? {
                    DispatchOutcome::Accepted => report.dispatched += 1,
                    DispatchOutcome::Deferred => report.deferred += 1,
                }
            }
        }

        info!(
            recovered = report.recovered,
            abandoned = report.abandoned,
            headroom = report.headroom,
            dispatched = report.dispatched,
            deferred = report.deferred,
            "scheduler tick"
        );
        Ok(report)
    }
}

/// Handle to an in-process ticker.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl TickerHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler ticker ended abnormally");
        }
    }
}

/// Run `tick` every `period` until shut down.
pub fn spawn_interval(tick: SchedulerTick, period: Duration) -> TickerHandle {
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "scheduler ticker started");

        loop {
            tokio::select! {
                _ = signal.notified() => {
                    info!("scheduler ticker received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = tick.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    });

    TickerHandle { shutdown, join }
}
