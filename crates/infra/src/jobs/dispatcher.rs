//! Decoupled execution: a bounded task queue in front of a worker pool.
//!
//! [`Dispatcher::dispatch`] returns as soon as the queue accepts the target.
//! If the queue stays full past the acceptance timeout the outcome is
//! [`DispatchOutcome::Deferred`]; the job is still `pending` and the next
//! scheduler tick picks it up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::processor::{ProcessOutcome, Processor, RunTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted,
    Deferred,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue closed")]
    Closed,
}

/// Sending half of the task queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<RunTarget>,
    accept_timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize, accept_timeout: Duration) -> (Self, mpsc::Receiver<RunTarget>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, accept_timeout }, rx)
    }

    pub async fn dispatch(&self, target: RunTarget) -> Result<DispatchOutcome, DispatchError> {
        match self.tx.send_timeout(target, self.accept_timeout).await {
            Ok(()) => {
                debug!(?target, "dispatch accepted");
                Ok(DispatchOutcome::Accepted)
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(?target, timeout_ms = self.accept_timeout.as_millis() as u64, "dispatch queue full, deferred");
                Ok(DispatchOutcome::Deferred)
            }
            Err(SendTimeoutError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchPoolConfig {
    pub queue_capacity: usize,
    /// Maximum targets running at once in this process.
    pub parallelism: usize,
    pub accept_timeout: Duration,
}

impl Default for DispatchPoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            parallelism: 8,
            accept_timeout: Duration::from_secs(10),
        }
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub runs: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    completed: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<ProcessOutcome, super::processor::ProcessorError>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(ProcessOutcome::Completed(_)) => &self.completed,
            Ok(ProcessOutcome::Requeued(_)) => &self.requeued,
            Ok(ProcessOutcome::Failed(_)) => &self.failed,
            Ok(_) => &self.skipped,
            Err(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read-only view of a running pool's counters. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchMonitor {
    permits: Arc<Semaphore>,
    parallelism: usize,
    counters: Arc<Counters>,
}

impl DispatchMonitor {
    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            runs: c.runs.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            in_flight: self.parallelism.saturating_sub(self.permits.available_permits()),
        }
    }
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct DispatchPoolHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    monitor: DispatchMonitor,
}

impl DispatchPoolHandle {
    pub fn monitor(&self) -> DispatchMonitor {
        self.monitor.clone()
    }

    /// Stop taking new targets and wait for running ones to finish.
    ///
    /// Targets still queued are dropped; their jobs are `pending` and the
    /// next tick dispatches them again.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "dispatch pool task ended abnormally");
        }
    }
}

pub struct DispatchPool;

impl DispatchPool {
    /// Spawn the pool on the current runtime.
    pub fn spawn(processor: Processor, config: DispatchPoolConfig) -> (Dispatcher, DispatchPoolHandle) {
        let (dispatcher, rx) = Dispatcher::channel(config.queue_capacity, config.accept_timeout);
        let parallelism = config.parallelism.max(1);
        let permits = Arc::new(Semaphore::new(parallelism));
        let shutdown = Arc::new(Notify::new());
        let counters = Arc::new(Counters::default());

        let join = tokio::spawn(pool_loop(
            processor,
            rx,
            permits.clone(),
            shutdown.clone(),
            counters.clone(),
        ));

        info!(
            queue_capacity = config.queue_capacity,
            parallelism, "dispatch pool started"
        );

        (
            dispatcher,
            DispatchPoolHandle {
                shutdown,
                join,
                monitor: DispatchMonitor {
                    permits,
                    parallelism,
                    counters,
                },
            },
        )
    }
}

async fn pool_loop(
    processor: Processor,
    mut rx: mpsc::Receiver<RunTarget>,
    permits: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    counters: Arc<Counters>,
) {
    let mut tasks = JoinSet::new();

    loop {
        // Take a worker slot first so a busy pool leaves targets in the queue.
        let permit = tokio::select! {
            _ = shutdown.notified() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let target = tokio::select! {
            _ = shutdown.notified() => break,
            target = rx.recv() => match target {
                Some(t) => t,
                None => break,
            },
        };

        let processor = processor.clone();
        let counters = counters.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = processor.run(target).await;
            match &result {
                Ok(outcome) => debug!(?target, outcome = outcome.as_str(), "dispatch target finished"),
                Err(e) => error!(?target, error = %e, "dispatch target errored"),
            }
            counters.record(&result);
        });

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "dispatch task panicked");
            }
        }
    }

    info!(running = tasks.len(), "dispatch pool draining");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "dispatch task panicked");
        }
    }
    info!("dispatch pool stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::claim::ConcurrencyGate;
    use crate::jobs::store::{InMemoryJobStore, JobStore};
    use crate::jobs::types::{JobStatus, NewJob};
    use crate::results::InMemoryFeedbackStore;
    use gradeflow_ai::ScriptedGenerator;
    use gradeflow_core::{JobId, SubjectId};

    #[tokio::test]
    async fn full_queue_defers_instead_of_failing() {
        let (dispatcher, _rx) = Dispatcher::channel(1, Duration::from_millis(20));

        assert_eq!(
            dispatcher.dispatch(RunTarget::NextPending).await,
            Ok(DispatchOutcome::Accepted)
        );
        assert_eq!(
            dispatcher.dispatch(RunTarget::Job(JobId::new())).await,
            Ok(DispatchOutcome::Deferred)
        );
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (dispatcher, rx) = Dispatcher::channel(1, Duration::from_millis(20));
        drop(rx);
        assert_eq!(
            dispatcher.dispatch(RunTarget::NextPending).await,
            Err(DispatchError::Closed)
        );
    }

    #[tokio::test]
    async fn pool_runs_dispatched_jobs_and_shuts_down() {
        let store = Arc::new(InMemoryJobStore::new());
        let processor = Processor::new(
            store.clone(),
            Arc::new(InMemoryFeedbackStore::new()),
            Arc::new(ScriptedGenerator::succeeding()),
            ConcurrencyGate::new(5),
            Duration::from_secs(5),
        );
        let (dispatcher, handle) = DispatchPool::spawn(processor, DispatchPoolConfig::default());

        let job = store
            .create(NewJob::new(SubjectId::parse("a-1").unwrap()))
            .await
            .unwrap();
        assert_eq!(
            dispatcher.dispatch(RunTarget::Job(job.id)).await,
            Ok(DispatchOutcome::Accepted)
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.get(job.id).await.unwrap().status != JobStatus::Completed {
            assert!(tokio::time::Instant::now() < deadline, "job never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The status write lands before the task records its outcome.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while handle.monitor().stats().completed == 0 {
            assert!(tokio::time::Instant::now() < deadline, "stats never updated");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.monitor().stats().runs, 1);

        handle.shutdown().await;
        assert_eq!(
            dispatcher.dispatch(RunTarget::NextPending).await,
            Err(DispatchError::Closed)
        );
    }
}
