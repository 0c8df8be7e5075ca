//! Import routes

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::commands::{trigger_import::handle as handle_trigger_import, TriggerImportCommand};
use super::queries::{
    get_run::handle as handle_get_run, get_stats::handle as handle_get_stats,
    list_runs::handle as handle_list_runs, GetRunQuery, GetStatsQuery, ListRunsQuery,
};
use crate::error::AppError;
use crate::import::ImportOrchestrator;

pub fn imports_routes() -> Router<Arc<ImportOrchestrator>> {
    Router::new()
        .route("/trigger", post(trigger_import))
        .route("/history", get(list_runs))
        .route("/stats", get(get_stats))
        .route("/:run_id", get(get_run))
}

/// Start an import of every configured source
///
/// POST /imports/trigger
async fn trigger_import(State(orchestrator): State<Arc<ImportOrchestrator>>) -> Response {
    match handle_trigger_import(orchestrator, TriggerImportCommand::default()).await {
        Ok(response) => (StatusCode::ACCEPTED, Json(json!(response))).into_response(),
        Err(e) => {
            tracing::error!("Failed to trigger import: {:?}", e);
            AppError::from(e).into_response()
        },
    }
}

/// Run history, newest first
///
/// GET /imports/history?limit=50
async fn list_runs(
    State(orchestrator): State<Arc<ImportOrchestrator>>,
    query: Result<Query<ListRunsQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return AppError::BadRequest(rejection.body_text()).into_response(),
    };

    match handle_list_runs(orchestrator, query).await {
        Ok(response) => (StatusCode::OK, Json(json!(response))).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Queue counters
///
/// GET /imports/stats
async fn get_stats(State(orchestrator): State<Arc<ImportOrchestrator>>) -> Response {
    match handle_get_stats(orchestrator, GetStatsQuery::default()).await {
        Ok(snapshot) => (StatusCode::OK, Json(json!(snapshot))).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// A single run with its failure entries
///
/// GET /imports/:run_id
async fn get_run(
    State(orchestrator): State<Arc<ImportOrchestrator>>,
    run_id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let Path(run_id) = match run_id {
        Ok(path) => path,
        Err(rejection) => return AppError::BadRequest(rejection.body_text()).into_response(),
    };

    match handle_get_run(orchestrator, GetRunQuery { run_id }).await {
        Ok(run) => (StatusCode::OK, Json(json!(run))).into_response(),
        Err(e) => {
            tracing::debug!("Import run not found or error: {:?}", e);
            AppError::from(e).into_response()
        },
    }
}
