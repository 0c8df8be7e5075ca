//! Record upserter

use jobfeed_common::JobPosting;
use std::sync::Arc;

use super::error::RecordError;
use super::store::JobStore;
use super::types::UpsertOutcome;

/// Validates and applies one record to the job store
#[derive(Clone)]
pub struct RecordUpserter {
    jobs: Arc<dyn JobStore>,
}

impl RecordUpserter {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Apply `record` as coming from `source_url`.
    ///
    /// Applying the same record twice leaves one stored job and reports
    /// `New` then `Updated`.
    pub async fn apply(
        &self,
        record: &JobPosting,
        source_url: &str,
    ) -> Result<UpsertOutcome, RecordError> {
        record.validate()?;
        Ok(self.jobs.upsert_job(record, source_url).await?)
    }
}
