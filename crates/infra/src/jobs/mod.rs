//! Feedback job pipeline.
//!
//! ## Design
//!
//! - The job store is the only coordination point: every transition is a
//!   conditional write on the current status
//! - A soft concurrency gate bounds simultaneously processing jobs
//! - Selection is priority descending, then oldest first
//! - Failed attempts requeue until `max_attempts`, then fail terminally
//! - Stale `processing` jobs are recovered by the zombie sweep on every tick
//!
//! ## Components
//!
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `Claimer` / `ConcurrencyGate`: claim protocol and cap
//! - `Processor`: generate, persist, finalize one job
//! - `Dispatcher` / `DispatchPool`: bounded queue feeding a worker pool
//! - `SchedulerTick` / `ZombieSweeper`: periodic batch pick-up and recovery
//! - `Submitter` / `JobAdmin`: entry points for requesters and operators

pub mod admin;
pub mod claim;
pub mod dispatcher;
pub mod postgres;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod submitter;
pub mod types;
pub mod view;

pub use admin::{AdminError, JobAdmin};
pub use claim::{ClaimOutcome, Claimer, ConcurrencyGate};
pub use dispatcher::{
    DispatchError, DispatchMonitor, DispatchOutcome, DispatchPool, DispatchPoolConfig, DispatchPoolHandle,
    DispatchStats, Dispatcher,
};
pub use postgres::PostgresJobStore;
pub use processor::{ProcessOutcome, Processor, ProcessorError, RunTarget};
pub use retry::{FailureDisposition, RetryPolicy};
pub use scheduler::{SchedulerTick, TickError, TickReport, TickerHandle, ZombieSweeper, spawn_interval};
pub use store::{ABANDONED_MESSAGE, InMemoryJobStore, JobStore, JobStoreError};
pub use submitter::{SubmitError, Submission, Submitter};
pub use types::{Job, JobFilter, JobStatus, NewJob, Priority, StatusCounts, StatusUpdate};
pub use view::{QueueEstimate, queue_estimate};
