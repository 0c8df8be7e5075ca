//! Feature modules implementing the jobfeed API
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes. Commands and queries are plain request types marked with the
//! `mediator` crate's `Request` trait and handled by standalone async
//! functions.
//!
//! # Features
//!
//! - **imports**: trigger imports, read run history and queue statistics

pub mod imports;

use axum::Router;
use std::sync::Arc;

use crate::import::ImportOrchestrator;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub orchestrator: Arc<ImportOrchestrator>,
}

/// Creates the API router with all feature routes mounted
///
/// - `/imports` - Import triggers, run history and queue stats
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest(
        "/imports",
        imports::imports_routes().with_state(state.orchestrator.clone()),
    )
}
