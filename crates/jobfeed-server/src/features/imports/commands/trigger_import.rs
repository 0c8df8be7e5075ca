//! Trigger import command
//!
//! Fetches every configured feed and queues the batches. The response comes
//! back once batches are queued; processing continues in the worker pool and
//! is observable through the run history.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::import::{FailedSource, ImportError, ImportOrchestrator};

/// Command to start an import of all configured sources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerImportCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerImportResponse {
    pub message: String,
    pub run_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_sources: Vec<FailedSourceItem>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub empty_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSourceItem {
    pub url: String,
    pub error: String,
}

impl From<FailedSource> for FailedSourceItem {
    fn from(source: FailedSource) -> Self {
        Self {
            url: source.url,
            error: source.error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerImportError {
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl From<TriggerImportError> for AppError {
    fn from(err: TriggerImportError) -> Self {
        match err {
            TriggerImportError::Import(e) => e.into(),
        }
    }
}

impl Request<Result<TriggerImportResponse, TriggerImportError>> for TriggerImportCommand {}

pub async fn handle(
    orchestrator: Arc<ImportOrchestrator>,
    _command: TriggerImportCommand,
) -> Result<TriggerImportResponse, TriggerImportError> {
    let report = orchestrator.trigger().await?;

    Ok(TriggerImportResponse {
        message: format!("Import triggered, {} run(s) queued", report.run_ids.len()),
        run_ids: report.run_ids,
        failed_sources: report.failed_sources.into_iter().map(Into::into).collect(),
        empty_sources: report.empty_sources,
    })
}
