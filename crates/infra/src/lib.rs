//! Infrastructure layer: job pipeline, stores, config, database wiring.

pub mod config;
pub mod db;
pub mod jobs;
pub mod pipeline;
pub mod results;


pub use config::{ConfigError, PipelineConfig, ServiceConfig};
pub use pipeline::Pipeline;
