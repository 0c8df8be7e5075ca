//! Application assembly
//!
//! Connects the configured backends, wires the import pipeline together and
//! builds the HTTP router. `main` drives the lifecycle; tests use the same
//! pieces with the in-memory backends.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jobfeed_sources::SourceAdapter;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::config::CorsConfig;
use crate::db::{self, DbConfig};
use crate::error::StartupError;
use crate::features;
use crate::import::{
    BatchProcessor, ImportBackend, ImportConfig, ImportOrchestrator, JobStore, MemoryQueue,
    MemoryStore, PgQueue, PgStore, QueueBackend, RecordUpserter, RunAggregator, RunStore,
    WorkerPool,
};
use crate::middleware;

/// Store and queue the pipeline runs against
#[derive(Clone)]
pub struct Backends {
    pub runs: Arc<dyn RunStore>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn QueueBackend>,
    /// Present for the PostgreSQL backend
    pub db: Option<PgPool>,
}

impl Backends {
    /// Process-local store and queue
    pub fn in_memory(config: &ImportConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            runs: store.clone(),
            jobs: store,
            queue: Arc::new(MemoryQueue::new(config.queue_settings())),
            db: None,
        }
    }

    /// Store and queue on a migrated pool
    pub fn postgres(pool: PgPool, config: &ImportConfig) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self {
            runs: store.clone(),
            jobs: store,
            queue: Arc::new(PgQueue::new(pool.clone(), config.queue_settings())),
            db: Some(pool),
        }
    }

    /// Connect the backend `config` selects, running migrations for PostgreSQL
    pub async fn connect(config: &ImportConfig, database: &DbConfig) -> Result<Self, StartupError> {
        match config.backend {
            ImportBackend::Memory => {
                info!("Using in-memory store and queue");
                Ok(Self::in_memory(config))
            },
            ImportBackend::Postgres => {
                let pool = db::create_pool(database).await.map_err(StartupError::Store)?;
                db::ping(&pool).await.map_err(StartupError::Store)?;

                sqlx::migrate!("../../migrations").run(&pool).await?;
                info!("Database migrations completed");

                Ok(Self::postgres(pool, config))
            },
        }
    }
}

/// Orchestrator plus the worker pool that drains its queue
pub struct Pipeline {
    pub orchestrator: Arc<ImportOrchestrator>,
    pub workers: WorkerPool,
}

impl Pipeline {
    pub fn new(config: &ImportConfig, backends: &Backends, adapter: Arc<dyn SourceAdapter>) -> Self {
        let orchestrator = Arc::new(ImportOrchestrator::new(
            config.sources.clone(),
            adapter,
            backends.runs.clone(),
            backends.queue.clone(),
            config.orchestrator(),
        ));

        let processor = BatchProcessor::new(
            backends.runs.clone(),
            RecordUpserter::new(backends.jobs.clone()),
        );

        let workers = WorkerPool::new(
            backends.queue.clone(),
            processor,
            RunAggregator::new(backends.runs.clone()),
            config.retry_policy(),
            config.worker_pool(),
        );

        Self {
            orchestrator,
            workers,
        }
    }
}

/// Application state shared across top-level handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ImportOrchestrator>,
    pub db: Option<PgPool>,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let feature_routes = features::router(features::FeatureState {
        orchestrator: state.orchestrator.clone(),
    });

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn health_check(State(state): State<AppState>) -> Response {
    let Some(pool) = state.db else {
        return (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "backend": "memory" })),
        )
            .into_response();
    };

    match db::ping(&pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "backend": "postgres", "database": "connected" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "backend": "postgres", "database": "unreachable" })),
            )
                .into_response()
        },
    }
}
