//! List import runs query
//!
//! Run history, newest first.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::import::{ImportOrchestrator, ImportRun, StoreError};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRunsQuery {
    /// Number of runs to return (default 50, capped at 500)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ListRunsQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub runs: Vec<ImportRun>,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListRunsError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ListRunsError> for AppError {
    fn from(err: ListRunsError) -> Self {
        match err {
            ListRunsError::Store(e) => AppError::Store(e),
        }
    }
}

impl Request<Result<ListRunsResponse, ListRunsError>> for ListRunsQuery {}

pub async fn handle(
    orchestrator: Arc<ImportOrchestrator>,
    query: ListRunsQuery,
) -> Result<ListRunsResponse, ListRunsError> {
    let runs = orchestrator.history(query.effective_limit()).await?;

    Ok(ListRunsResponse {
        count: runs.len(),
        runs,
    })
}
