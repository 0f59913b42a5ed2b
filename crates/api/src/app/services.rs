//! Infrastructure wiring for the HTTP layer.

use std::sync::Arc;

use tracing::{info, warn};

use gradeflow_ai::{FeedbackGenerator, HttpFeedbackGenerator, UnconfiguredGenerator};
use gradeflow_auth::{Hs256JwtValidator, JwtValidator, SharedSecret};
use gradeflow_infra::config::{PipelineConfig, ServiceConfig};
use gradeflow_infra::db;
use gradeflow_infra::jobs::{
    DispatchMonitor, Dispatcher, InMemoryJobStore, JobAdmin, JobStore, PostgresJobStore,
    SchedulerTick, Submitter,
};
use gradeflow_infra::results::{FeedbackStore, InMemoryFeedbackStore, PostgresFeedbackStore};
use gradeflow_infra::Pipeline;

/// Everything handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub store: Arc<dyn JobStore>,
    pub results: Arc<dyn FeedbackStore>,
    pub submitter: Submitter,
    pub admin: JobAdmin,
    pub tick: SchedulerTick,
    pub dispatcher: Dispatcher,
    pub monitor: DispatchMonitor,
    pub config: PipelineConfig,
}

impl AppServices {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            store: pipeline.store.clone(),
            results: pipeline.results.clone(),
            submitter: pipeline.submitter.clone(),
            admin: pipeline.admin.clone(),
            tick: pipeline.tick.clone(),
            dispatcher: pipeline.dispatcher.clone(),
            monitor: pipeline.monitor(),
            config: pipeline.config.clone(),
        }
    }
}

/// Credentials checked by the middleware layers.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt: Arc<dyn JwtValidator>,
    pub scheduler_secret: SharedSecret,
    pub processor_secret: SharedSecret,
}

impl AuthSettings {
    pub fn new(jwt_secret: &str, scheduler_secret: &str, processor_secret: &str) -> Self {
        Self {
            jwt: Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes())),
            scheduler_secret: SharedSecret::new(scheduler_secret),
            processor_secret: SharedSecret::new(processor_secret),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.scheduler_secret,
            &config.processor_secret,
        )
    }
}

/// Postgres stores when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_stores(
    config: &ServiceConfig,
) -> Result<(Arc<dyn JobStore>, Arc<dyn FeedbackStore>), db::DbError> {
    match &config.database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            info!("using postgres job and feedback stores");
            Ok((
                Arc::new(PostgresJobStore::new(pool.clone())),
                Arc::new(PostgresFeedbackStore::new(pool)),
            ))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory stores (state is lost on restart)");
            Ok((
                Arc::new(InMemoryJobStore::new()),
                Arc::new(InMemoryFeedbackStore::new()),
            ))
        }
    }
}

pub fn build_generator(config: &ServiceConfig) -> Arc<dyn FeedbackGenerator> {
    match &config.generator_url {
        Some(url) => {
            let mut generator = HttpFeedbackGenerator::new(url.clone());
            if let Some(key) = &config.generator_api_key {
                generator = generator.with_api_key(key.clone());
            }
            info!(endpoint = %url, "using http feedback generator");
            Arc::new(generator)
        }
        None => {
            warn!("GENERATOR_URL not set; every generation attempt will fail");
            Arc::new(UnconfiguredGenerator)
        }
    }
}
