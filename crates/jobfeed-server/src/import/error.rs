//! Import pipeline errors

use jobfeed_common::JobfeedError;
use std::time::Duration;
use thiserror::Error;

use super::queue::QueueError;
use super::store::StoreError;

/// Failure to apply a single record; the batch carries on
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Invalid(#[from] JobfeedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a whole batch attempt; subject to retry
#[derive(Error, Debug)]
pub enum BatchExecutionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Batch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Batch processing panicked: {0}")]
    Panicked(String),
}

/// Failure of the fetch-and-split phase of a trigger
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
