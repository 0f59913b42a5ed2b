//! Wires the job pipeline components around shared stores.

use std::sync::Arc;

use tracing::info;

use gradeflow_ai::FeedbackGenerator;

use crate::config::PipelineConfig;
use crate::jobs::{
    ConcurrencyGate, DispatchMonitor, DispatchPool, DispatchPoolHandle, Dispatcher, JobAdmin, JobStore, Processor,
    SchedulerTick, Submitter, TickerHandle, ZombieSweeper, spawn_interval,
};
use crate::results::FeedbackStore;

/// A running pipeline: worker pool started, optional ticker running.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub store: Arc<dyn JobStore>,
    pub results: Arc<dyn FeedbackStore>,
    pub dispatcher: Dispatcher,
    pub submitter: Submitter,
    pub admin: JobAdmin,
    pub tick: SchedulerTick,
    pool: DispatchPoolHandle,
    ticker: Option<TickerHandle>,
}

impl Pipeline {
    /// Start the worker pool (and the ticker, if configured) on the current runtime.
    pub fn start(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        results: Arc<dyn FeedbackStore>,
        generator: Arc<dyn FeedbackGenerator>,
    ) -> Self {
        let gate = ConcurrencyGate::new(config.concurrency_cap);
        let processor = Processor::new(
            store.clone(),
            results.clone(),
            generator,
            gate,
            config.generation_timeout,
        );
        let (dispatcher, pool) = DispatchPool::spawn(processor, config.dispatch_pool());

        let tick = SchedulerTick::new(
            store.clone(),
            ZombieSweeper::new(store.clone(), config.zombie_threshold),
            gate,
            dispatcher.clone(),
        );
        let ticker = config
            .tick_interval
            .map(|period| spawn_interval(tick.clone(), period));

        info!(
            concurrency_cap = config.concurrency_cap,
            max_attempts = config.max_attempts,
            ticker = ticker.is_some(),
            "job pipeline started"
        );

        Self {
            submitter: Submitter::new(store.clone(), dispatcher.clone(), config.max_attempts),
            admin: JobAdmin::new(store.clone(), dispatcher.clone()),
            config,
            store,
            results,
            dispatcher,
            tick,
            pool,
            ticker,
        }
    }

    /// Counters of the worker pool, for health reporting.
    pub fn monitor(&self) -> DispatchMonitor {
        self.pool.monitor()
    }

    /// Stop the ticker, then drain the worker pool.
    pub async fn shutdown(self) {
        if let Some(ticker) = self.ticker {
            ticker.shutdown().await;
        }
        self.pool.shutdown().await;
        info!("job pipeline stopped");
    }
}
