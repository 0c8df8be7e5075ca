//! Batch queue
//!
//! A queued batch moves through `waiting -> active -> completed | failed`.
//! Claiming hands out a lock token; every later call for that attempt must
//! present the token, so a worker whose lock expired cannot complete or fail a
//! batch another worker now owns.
//!
//! Locks expire `lock_duration` after the last heartbeat. Expired locks are
//! found by [`QueueBackend::reclaim_stalled`]: the batch is put back to
//! `waiting`, or failed outright on its `max_stalled`-th stall.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::types::{Batch, QueueSnapshot};

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

/// Default batch priority; lower runs first
pub const DEFAULT_PRIORITY: i32 = 1;

/// Queue operation errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Invalid batch payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => QueueError::Unavailable(err.to_string()),
            other => QueueError::Database(other),
        }
    }
}

/// Per-batch submission options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub priority: i32,
    /// Attempts allowed, counting the first
    pub max_attempts: u32,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_attempts: 3,
        }
    }
}

/// Queue-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub lock_duration: Duration,
    /// Finished batches retained for inspection; older ones are dropped
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(30),
            keep_completed: 100,
            keep_failed: 100,
        }
    }
}

/// A batch attempt owned by one worker
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub id: Uuid,
    pub batch: Batch,
    /// 1-based number of this attempt
    pub attempt: u32,
    pub max_attempts: u32,
    pub lock_token: Uuid,
}

/// A batch failed by the stall checker
#[derive(Debug, Clone)]
pub struct StalledBatch {
    pub id: Uuid,
    pub batch: Batch,
    pub stalled_count: u32,
}

/// What one stall sweep did
#[derive(Debug, Clone, Default)]
pub struct StallReport {
    pub requeued: usize,
    pub failed: Vec<StalledBatch>,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn submit(&self, batch: Batch, options: SubmitOptions) -> Result<Uuid, QueueError>;

    /// Lock the next due batch, lowest priority value first, then FIFO
    async fn claim(&self) -> Result<Option<ClaimedBatch>, QueueError>;

    /// Extend the lock; false if the lock is no longer held
    async fn heartbeat(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError>;

    async fn complete(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError>;

    /// Release the batch back to waiting, due again after `delay`
    async fn retry(
        &self,
        id: Uuid,
        lock_token: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError>;

    async fn fail(&self, id: Uuid, lock_token: Uuid, error: &str) -> Result<bool, QueueError>;

    async fn reclaim_stalled(&self, max_stalled: u32) -> Result<StallReport, QueueError>;

    async fn snapshot(&self) -> Result<QueueSnapshot, QueueError>;
}
