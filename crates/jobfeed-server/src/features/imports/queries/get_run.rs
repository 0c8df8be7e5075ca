//! Get import run query

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::import::{ImportOrchestrator, ImportRun, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRunQuery {
    pub run_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetRunError {
    #[error("Import run {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GetRunError> for AppError {
    fn from(err: GetRunError) -> Self {
        match err {
            GetRunError::NotFound(id) => AppError::NotFound(format!("Import run {} not found", id)),
            GetRunError::Store(e) => AppError::Store(e),
        }
    }
}

impl Request<Result<ImportRun, GetRunError>> for GetRunQuery {}

pub async fn handle(
    orchestrator: Arc<ImportOrchestrator>,
    query: GetRunQuery,
) -> Result<ImportRun, GetRunError> {
    orchestrator
        .run(query.run_id)
        .await?
        .ok_or(GetRunError::NotFound(query.run_id))
}
