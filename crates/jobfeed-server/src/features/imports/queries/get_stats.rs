//! Queue statistics query
//!
//! Point-in-time batch counts straight from the queue backend; nothing is
//! cached between polls.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::import::{ImportError, ImportOrchestrator, QueueSnapshot};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatsQuery {}

#[derive(Debug, thiserror::Error)]
pub enum GetStatsError {
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl From<GetStatsError> for AppError {
    fn from(err: GetStatsError) -> Self {
        match err {
            GetStatsError::Import(e) => e.into(),
        }
    }
}

impl Request<Result<QueueSnapshot, GetStatsError>> for GetStatsQuery {}

pub async fn handle(
    orchestrator: Arc<ImportOrchestrator>,
    _query: GetStatsQuery,
) -> Result<QueueSnapshot, GetStatsError> {
    Ok(orchestrator.stats().await?)
}
