//! Import pipeline configuration
//!
//! Loaded from `IMPORT_*` environment variables; anything unset or
//! unparsable falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{env_list, env_or};

use super::orchestrator::OrchestratorSettings;
use super::queue::{QueueSettings, DEFAULT_PRIORITY};
use super::retry::RetryPolicy;
use super::worker::WorkerPoolConfig;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LOCK_DURATION_SECS: u64 = 30;
pub const DEFAULT_STALL_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_STALLED_COUNT: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
pub const DEFAULT_KEEP_COMPLETED: usize = 100;
pub const DEFAULT_KEEP_FAILED: usize = 100;

/// Hourly, on the hour
pub const DEFAULT_CRON_SCHEDULE: &str = "0 * * * *";

/// Where runs, jobs and queued batches live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportBackend {
    #[default]
    Postgres,
    /// Process-local; nothing survives a restart
    Memory,
}

impl FromStr for ImportBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(ImportBackend::Postgres),
            "memory" => Ok(ImportBackend::Memory),
            other => anyhow::bail!(
                "Invalid IMPORT_BACKEND: {}. Must be 'postgres' or 'memory'",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportConfig {
    pub sources: Vec<String>,
    pub backend: ImportBackend,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub batch_timeout_secs: u64,
    pub lock_duration_secs: u64,
    pub stall_check_interval_secs: u64,
    pub max_stalled_count: u32,
    pub poll_interval_ms: u64,
    pub fetch_concurrency: usize,
    pub priority: i32,
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub schedule_enabled: bool,
    pub cron_schedule: String,
}

impl ImportConfig {
    /// Load import configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let sources =
            env_list("IMPORT_SOURCES").unwrap_or_else(jobfeed_sources::default_sources);

        let backend = match std::env::var("IMPORT_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => ImportBackend::default(),
        };

        let config = Self {
            sources,
            backend,
            batch_size: env_or("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            concurrency: env_or("IMPORT_CONCURRENCY", DEFAULT_CONCURRENCY),
            max_attempts: env_or("IMPORT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            backoff_base_ms: env_or("IMPORT_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_ms: env_or("IMPORT_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            batch_timeout_secs: env_or("IMPORT_BATCH_TIMEOUT_SECS", DEFAULT_BATCH_TIMEOUT_SECS),
            lock_duration_secs: env_or("IMPORT_LOCK_DURATION_SECS", DEFAULT_LOCK_DURATION_SECS),
            stall_check_interval_secs: env_or(
                "IMPORT_STALL_CHECK_INTERVAL_SECS",
                DEFAULT_STALL_CHECK_INTERVAL_SECS,
            ),
            max_stalled_count: env_or("IMPORT_MAX_STALLED_COUNT", DEFAULT_MAX_STALLED_COUNT),
            poll_interval_ms: env_or("IMPORT_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            fetch_concurrency: env_or("IMPORT_FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY),
            priority: env_or("IMPORT_PRIORITY", DEFAULT_PRIORITY),
            keep_completed: env_or("IMPORT_KEEP_COMPLETED", DEFAULT_KEEP_COMPLETED),
            keep_failed: env_or("IMPORT_KEEP_FAILED", DEFAULT_KEEP_FAILED),
            schedule_enabled: env_or("IMPORT_SCHEDULE_ENABLED", false),
            cron_schedule: std::env::var("IMPORT_CRON_SCHEDULE")
                .unwrap_or_else(|_| DEFAULT_CRON_SCHEDULE.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("IMPORT_SOURCES must list at least one feed");
        }
        if self.batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be greater than 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("IMPORT_CONCURRENCY must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("IMPORT_MAX_ATTEMPTS must be greater than 0");
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            anyhow::bail!(
                "IMPORT_BACKOFF_MAX_MS ({}) cannot be less than IMPORT_BACKOFF_BASE_MS ({})",
                self.backoff_max_ms,
                self.backoff_base_ms
            );
        }
        if self.batch_timeout_secs == 0 {
            anyhow::bail!("IMPORT_BATCH_TIMEOUT_SECS must be greater than 0");
        }
        if self.lock_duration_secs == 0 {
            anyhow::bail!("IMPORT_LOCK_DURATION_SECS must be greater than 0");
        }
        if self.stall_check_interval_secs == 0 {
            anyhow::bail!("IMPORT_STALL_CHECK_INTERVAL_SECS must be greater than 0");
        }
        if self.max_stalled_count == 0 {
            anyhow::bail!("IMPORT_MAX_STALLED_COUNT must be greater than 0");
        }
        if self.fetch_concurrency == 0 {
            anyhow::bail!("IMPORT_FETCH_CONCURRENCY must be greater than 0");
        }
        if self.schedule_enabled {
            super::scheduler::parse_cron(&self.cron_schedule).map_err(|e| {
                anyhow::anyhow!("Invalid IMPORT_CRON_SCHEDULE '{}': {}", self.cron_schedule, e)
            })?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.concurrency,
            batch_timeout: Duration::from_secs(self.batch_timeout_secs),
            lock_duration: Duration::from_secs(self.lock_duration_secs),
            stall_check_interval: Duration::from_secs(self.stall_check_interval_secs),
            max_stalled_count: self.max_stalled_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            lock_duration: Duration::from_secs(self.lock_duration_secs),
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            batch_size: self.batch_size,
            fetch_concurrency: self.fetch_concurrency,
            priority: self.priority,
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            sources: jobfeed_sources::default_sources(),
            backend: ImportBackend::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            lock_duration_secs: DEFAULT_LOCK_DURATION_SECS,
            stall_check_interval_secs: DEFAULT_STALL_CHECK_INTERVAL_SECS,
            max_stalled_count: DEFAULT_MAX_STALLED_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            priority: DEFAULT_PRIORITY,
            keep_completed: DEFAULT_KEEP_COMPLETED,
            keep_failed: DEFAULT_KEEP_FAILED,
            schedule_enabled: false,
            cron_schedule: DEFAULT_CRON_SCHEDULE.to_string(),
        }
    }
}
