//! Configuration loading and representation.
//!
//! Everything is read once at startup from the environment. Absent values use
//! the documented defaults; malformed values are a [`ConfigError`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::jobs::DispatchPoolConfig;

const DEV_SCHEDULER_SECRET: &str = "dev-scheduler-secret";
const DEV_PROCESSOR_SECRET: &str = "dev-processor-secret";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Job pipeline knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub concurrency_cap: usize,
    pub max_attempts: u32,
    pub zombie_threshold: Duration,
    pub dispatch_timeout: Duration,
    pub generation_timeout: Duration,
    pub dispatch_queue_capacity: usize,
    pub worker_parallelism: usize,
    /// In-process ticker period; `None` leaves ticking to an external cron.
    pub tick_interval: Option<Duration>,
    pub stats_window: Duration,
    /// Rough per-job duration used for requester wait estimates.
    pub estimated_job_duration: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 5,
            max_attempts: 3,
            zombie_threshold: Duration::from_secs(300),
            dispatch_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(300),
            dispatch_queue_capacity: 64,
            worker_parallelism: 8,
            tick_interval: None,
            stats_window: Duration::from_secs(24 * 3600),
            estimated_job_duration: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            concurrency_cap: parse_positive(&lookup, "GRADEFLOW_CONCURRENCY_CAP", d.concurrency_cap)?,
            max_attempts: parse_positive(&lookup, "GRADEFLOW_MAX_ATTEMPTS", d.max_attempts)?,
            zombie_threshold: secs(&lookup, "GRADEFLOW_ZOMBIE_THRESHOLD_SECS", d.zombie_threshold)?,
            dispatch_timeout: secs(&lookup, "GRADEFLOW_DISPATCH_TIMEOUT_SECS", d.dispatch_timeout)?,
            generation_timeout: secs(&lookup, "GRADEFLOW_GENERATION_TIMEOUT_SECS", d.generation_timeout)?,
            dispatch_queue_capacity: parse_positive(
                &lookup,
                "GRADEFLOW_DISPATCH_QUEUE_CAPACITY",
                d.dispatch_queue_capacity,
            )?,
            worker_parallelism: parse_positive(&lookup, "GRADEFLOW_WORKER_PARALLELISM", d.worker_parallelism)?,
            tick_interval: match non_empty(&lookup, "GRADEFLOW_TICK_INTERVAL_SECS") {
                Some(_) => Some(secs(&lookup, "GRADEFLOW_TICK_INTERVAL_SECS", Duration::ZERO)?),
                None => None,
            },
            stats_window: Duration::from_secs(
                parse_positive::<u64>(&lookup, "GRADEFLOW_STATS_WINDOW_HOURS", 24)? * 3600,
            ),
            estimated_job_duration: secs(
                &lookup,
                "GRADEFLOW_ESTIMATED_JOB_SECS",
                d.estimated_job_duration,
            )?,
        })
    }

    pub fn dispatch_pool(&self) -> DispatchPoolConfig {
        DispatchPoolConfig {
            queue_capacity: self.dispatch_queue_capacity,
            parallelism: self.worker_parallelism,
            accept_timeout: self.dispatch_timeout,
        }
    }
}

/// Process-level settings for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs on in-memory stores.
    pub database_url: Option<String>,
    /// `None` wires a generator that fails every call.
    pub generator_url: Option<String>,
    pub generator_api_key: Option<String>,
    pub jwt_secret: String,
    pub scheduler_secret: String,
    pub processor_secret: String,
    pub pipeline: PipelineConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = match non_empty(&lookup, "BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        Ok(Self {
            bind_addr,
            database_url: non_empty(&lookup, "DATABASE_URL"),
            generator_url: non_empty(&lookup, "GENERATOR_URL"),
            generator_api_key: non_empty(&lookup, "GENERATOR_API_KEY"),
            jwt_secret: secret_or_dev_default(&lookup, "JWT_SECRET", DEV_JWT_SECRET),
            scheduler_secret: secret_or_dev_default(&lookup, "SCHEDULER_SECRET", DEV_SCHEDULER_SECRET),
            processor_secret: secret_or_dev_default(&lookup, "PROCESSOR_SECRET", DEV_PROCESSOR_SECRET),
            pipeline: PipelineConfig::from_lookup(&lookup)?,
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn secret_or_dev_default(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    dev_default: &str,
) -> String {
    non_empty(lookup, key).unwrap_or_else(|| {
        tracing::warn!(key, "secret not set; using insecure dev default");
        dev_default.to_string()
    })
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = non_empty(lookup, key) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match non_empty(lookup, key) {
        Some(_) => Ok(Duration::from_secs(parse_positive::<u64>(lookup, key, 0)?)),
        None => Ok(default),
    }
}
