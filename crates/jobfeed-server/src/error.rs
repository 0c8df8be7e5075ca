//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::import::{ImportError, QueueError, StoreError};

/// Fatal errors while bringing the service up
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Store unreachable: {0}")]
    Store(#[source] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrations(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Store(e) => AppError::Store(e),
            ImportError::Queue(e) => AppError::Queue(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Store(ref e) if e.is_unavailable() => {
                tracing::error!("Store unavailable: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            },
            AppError::Store(StoreError::RunNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("Import run {} not found", id))
            },
            AppError::Store(ref e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::Queue(ref e) if e.is_unavailable() => {
                tracing::error!("Queue unavailable: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Queue unavailable".to_string())
            },
            AppError::Queue(ref e) => {
                tracing::error!("Queue error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A queue error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
