//! Source-scoped fetch errors

use thiserror::Error;

/// Failure to produce records from one feed.
///
/// Every variant carries the feed locator so the orchestrator can report it
/// without extra bookkeeping.
#[derive(Error, Debug)]
pub enum SourceFetchError {
    #[error("Request to {url} failed: {error}")]
    Request {
        url: String,
        #[source]
        error: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse feed {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Item {index} of {url} could not be normalized: {reason}")]
    Normalize {
        url: String,
        index: usize,
        reason: String,
    },
}

impl SourceFetchError {
    /// Locator of the feed that failed
    pub fn url(&self) -> &str {
        match self {
            SourceFetchError::Request { url, .. }
            | SourceFetchError::Status { url, .. }
            | SourceFetchError::Parse { url, .. }
            | SourceFetchError::Normalize { url, .. } => url,
        }
    }
}
