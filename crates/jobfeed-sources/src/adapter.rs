//! Source adapter trait

use async_trait::async_trait;
use jobfeed_common::JobPosting;

use crate::error::SourceFetchError;

/// Fetches and normalizes a single feed.
///
/// Implementations must not retry internally; the orchestrator decides what a
/// failed source means for the trigger.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError>;
}
