//! Batch processor
//!
//! Applies a batch's records one at a time. A bad record becomes a failure
//! entry and the loop moves on; a store that stops answering aborts the whole
//! attempt so the worker pool can retry it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{BatchExecutionError, RecordError};
use super::store::RunStore;
use super::types::{Batch, BatchResult, FailureEntry};
use super::upserter::RecordUpserter;

/// Records between progress log lines
const PROGRESS_EVERY: usize = 25;

#[derive(Clone)]
pub struct BatchProcessor {
    runs: Arc<dyn RunStore>,
    upserter: RecordUpserter,
}

impl BatchProcessor {
    pub fn new(runs: Arc<dyn RunStore>, upserter: RecordUpserter) -> Self {
        Self { runs, upserter }
    }

    pub async fn process(&self, batch: &Batch) -> Result<BatchResult, BatchExecutionError> {
        if batch.sequence_number == 1 && self.runs.mark_processing(batch.run_id).await? {
            info!(run_id = %batch.run_id, source = %batch.source_url, "Import run processing");
        }

        let total = batch.records.len();
        let mut result = BatchResult::default();

        for (index, record) in batch.records.iter().enumerate() {
            match self.upserter.apply(record, &batch.source_url).await {
                Ok(outcome) => result.record(outcome),
                Err(RecordError::Store(e)) if e.is_unavailable() => {
                    warn!(
                        run_id = %batch.run_id,
                        sequence = batch.sequence_number,
                        processed = index,
                        error = %e,
                        "Store unavailable, abandoning batch attempt"
                    );
                    return Err(e.into());
                },
                Err(e) => {
                    debug!(
                        run_id = %batch.run_id,
                        external_id = %record.external_id,
                        error = %e,
                        "Record rejected"
                    );
                    result.record_failure(FailureEntry::new(
                        record,
                        e.to_string(),
                        Some(format!("{:?}", e)),
                    ));
                },
            }

            if (index + 1) % PROGRESS_EVERY == 0 && index + 1 < total {
                debug!(
                    run_id = %batch.run_id,
                    sequence = batch.sequence_number,
                    processed = index + 1,
                    total,
                    "Batch progress"
                );
            }
        }

        info!(
            run_id = %batch.run_id,
            sequence = batch.sequence_number,
            total_batches = batch.total_batches,
            new = result.new,
            updated = result.updated,
            failed = result.failed,
            "Batch processed"
        );

        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::store::{JobStore, MemoryStore, RunStore};
    use crate::import::types::{ImportRun, RunStatus};
    use chrono::Utc;
    use jobfeed_common::JobPosting;

    const SOURCE: &str = "https://feed.example/rss";

    async fn setup(records: Vec<JobPosting>, sequence_number: i32) -> (Arc<MemoryStore>, Batch) {
        let store = Arc::new(MemoryStore::new());
        let run = ImportRun::new(SOURCE, records.len() as i64, 2);
        store.create_run(&run).await.unwrap();

        let batch = Batch {
            run_id: run.id,
            sequence_number,
            total_batches: 2,
            records,
            source_url: SOURCE.to_string(),
            run_started_at: run.started_at,
        };
        (store, batch)
    }

    fn processor(store: &Arc<MemoryStore>) -> BatchProcessor {
        BatchProcessor::new(store.clone(), RecordUpserter::new(store.clone()))
    }

    fn postings(n: usize) -> Vec<JobPosting> {
        (0..n)
            .map(|i| JobPosting::new(format!("job-{i}"), format!("Job {i}"), SOURCE))
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_record_is_isolated() {
        let mut records = postings(5);
        records[2].title = String::new();
        let (store, batch) = setup(records, 1).await;

        let result = processor(&store).process(&batch).await.unwrap();

        assert_eq!(result.new, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].record["external_id"], "job-2");
        assert!(result.failures[0].reason.contains("title"));
    }

    #[tokio::test]
    async fn test_first_batch_marks_run_processing() {
        let (store, batch) = setup(postings(1), 1).await;
        processor(&store).process(&batch).await.unwrap();

        let run = store.get_run(batch.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Processing);
    }

    #[tokio::test]
    async fn test_later_batch_leaves_status_alone() {
        let (store, batch) = setup(postings(1), 2).await;
        processor(&store).process(&batch).await.unwrap();

        let run = store.get_run(batch.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_the_attempt() {
        let (store, batch) = setup(postings(3), 2).await;
        store.fail_next_upserts(1);

        let err = processor(&store).process(&batch).await.unwrap_err();
        assert!(matches!(err, BatchExecutionError::Store(ref e) if e.is_unavailable()));
        assert_eq!(store.count_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processing_never_regresses_terminal_run() {
        let (store, batch) = setup(postings(1), 1).await;
        store
            .finalize_run(batch.run_id, RunStatus::Completed, Utc::now(), 5)
            .await
            .unwrap();

        processor(&store).process(&batch).await.unwrap();
        let run = store.get_run(batch.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
}
