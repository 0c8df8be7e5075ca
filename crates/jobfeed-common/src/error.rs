//! Error types shared across jobfeed crates

use thiserror::Error;

/// Result type alias for jobfeed operations
pub type Result<T> = std::result::Result<T, JobfeedError>;

/// Main error type for jobfeed
#[derive(Error, Debug)]
pub enum JobfeedError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    InvalidRecord { field: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobfeedError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        JobfeedError::InvalidRecord {
            field,
            reason: reason.into(),
        }
    }
}
