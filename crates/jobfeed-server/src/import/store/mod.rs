//! Persistent store for runs and jobs
//!
//! Two traits split the concerns the pipeline needs:
//!
//! - [`RunStore`]: run lifecycle and the atomic per-batch fold
//! - [`JobStore`]: idempotent job upserts keyed by `external_id`
//!
//! [`PgStore`] implements both on PostgreSQL; [`MemoryStore`] implements both
//! in process for tests and for running without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_common::JobPosting;
use thiserror::Error;
use uuid::Uuid;

use super::types::{BatchResult, ImportRun, RunProgress, RunStatus, StoredJob, UpsertOutcome};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend cannot be reached; callers retry at batch level
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Import run {0} not found")]
    RunNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Failed to decode stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Database(other),
        }
    }
}

/// Import run persistence
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &ImportRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<ImportRun>, StoreError>;

    /// Most recent runs first
    async fn list_runs(&self, limit: i64) -> Result<Vec<ImportRun>, StoreError>;

    /// pending -> processing; returns false if the run had already moved on
    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Fold one batch outcome into the run counters.
    ///
    /// Applied at most once per `(id, sequence_number)`. A repeated fold
    /// leaves the counters untouched and returns the current progress with
    /// `applied = false`.
    async fn fold_batch(
        &self,
        id: Uuid,
        sequence_number: i32,
        result: &BatchResult,
        terminal_failure: bool,
    ) -> Result<RunProgress, StoreError>;

    /// Move a non-terminal run to `status`; returns false if it was already terminal
    async fn finalize_run(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool, StoreError>;
}

/// Job persistence
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or update by `external_id` in one atomic step.
    ///
    /// Inserts stamp `source_url`, `created_at` and `updated_at`; updates
    /// rewrite every field except `created_at`.
    async fn upsert_job(
        &self,
        posting: &JobPosting,
        source_url: &str,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get_job(&self, external_id: &str) -> Result<Option<StoredJob>, StoreError>;

    async fn count_jobs(&self) -> Result<i64, StoreError>;
}
