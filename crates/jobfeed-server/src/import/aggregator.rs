//! Run aggregator
//!
//! Folds batch outcomes into their run. The store counts folded batches per
//! run; the run becomes terminal only once that count reaches
//! `total_batches`, whatever order the batches finish in.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::{RunStore, StoreError};
use super::types::{Batch, BatchResult, RunProgress, RunStatus};

#[derive(Clone)]
pub struct RunAggregator {
    runs: Arc<dyn RunStore>,
}

impl RunAggregator {
    pub fn new(runs: Arc<dyn RunStore>) -> Self {
        Self { runs }
    }

    /// Fold a batch that ran to completion.
    ///
    /// Returns the status the run was finalized to, if this fold finished it.
    pub async fn record_success(
        &self,
        batch: &Batch,
        result: &BatchResult,
    ) -> Result<Option<RunStatus>, StoreError> {
        let progress = self
            .runs
            .fold_batch(batch.run_id, batch.sequence_number, result, false)
            .await?;
        self.finish_if_done(batch, progress).await
    }

    /// Fold a batch that exhausted its attempts; all its records count as failed
    pub async fn record_failure(
        &self,
        batch: &Batch,
        error: &str,
    ) -> Result<Option<RunStatus>, StoreError> {
        let result = BatchResult::terminal_failure(batch, error);
        let progress = self
            .runs
            .fold_batch(batch.run_id, batch.sequence_number, &result, true)
            .await?;
        self.finish_if_done(batch, progress).await
    }

    async fn finish_if_done(
        &self,
        batch: &Batch,
        progress: RunProgress,
    ) -> Result<Option<RunStatus>, StoreError> {
        if !progress.applied && progress.status.is_terminal() {
            warn!(
                run_id = %batch.run_id,
                sequence = batch.sequence_number,
                status = progress.status.as_str(),
                "Run already finished, ignoring batch outcome"
            );
        } else if !progress.applied {
            warn!(
                run_id = %batch.run_id,
                sequence = batch.sequence_number,
                "Batch outcome already folded, ignoring repeat"
            );
        }

        // A repeated fold still checks: the earlier one may have crashed before finalizing
        if !progress.all_batches_done() || progress.status.is_terminal() {
            return Ok(None);
        }

        let status = if progress.failed_batches > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - progress.started_at).num_milliseconds().max(0);

        if !self
            .runs
            .finalize_run(batch.run_id, status, finished_at, duration_ms)
            .await?
        {
            return Ok(None);
        }

        info!(
            run_id = %batch.run_id,
            source = %batch.source_url,
            status = status.as_str(),
            total_batches = progress.total_batches,
            failed_batches = progress.failed_batches,
            duration_ms,
            "Import run finished"
        );

        Ok(Some(status))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::store::MemoryStore;
    use crate::import::types::{ImportRun, UpsertOutcome};
    use jobfeed_common::JobPosting;

    const SOURCE: &str = "https://feed.example/rss";

    async fn run_with_batches(store: &MemoryStore, total_batches: i32) -> Vec<Batch> {
        let run = ImportRun::new(SOURCE, i64::from(total_batches) * 2, total_batches);
        store.create_run(&run).await.unwrap();

        (1..=total_batches)
            .map(|seq| Batch {
                run_id: run.id,
                sequence_number: seq,
                total_batches,
                records: vec![
                    JobPosting::new(format!("{seq}-a"), "A", SOURCE),
                    JobPosting::new(format!("{seq}-b"), "B", SOURCE),
                ],
                source_url: SOURCE.to_string(),
                run_started_at: run.started_at,
            })
            .collect()
    }

    fn two_new() -> BatchResult {
        let mut result = BatchResult::default();
        result.record(UpsertOutcome::New);
        result.record(UpsertOutcome::New);
        result
    }

    #[tokio::test]
    async fn test_last_sequence_first_does_not_finalize() {
        let store = Arc::new(MemoryStore::new());
        let batches = run_with_batches(&store, 3).await;
        let aggregator = RunAggregator::new(store.clone());

        assert_eq!(aggregator.record_success(&batches[2], &two_new()).await.unwrap(), None);
        assert_eq!(aggregator.record_success(&batches[0], &two_new()).await.unwrap(), None);

        let run = store.get_run(batches[0].run_id).await.unwrap().unwrap();
        assert!(!run.status.is_terminal());

        let status = aggregator.record_success(&batches[1], &two_new()).await.unwrap();
        assert_eq!(status, Some(RunStatus::Completed));

        let run = store.get_run(batches[0].run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_imported, 6);
        assert_eq!(run.new_count, 6);
        assert!(run.counters_balanced());
        assert!(run.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_repeated_fold_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let batches = run_with_batches(&store, 2).await;
        let aggregator = RunAggregator::new(store.clone());

        aggregator.record_success(&batches[0], &two_new()).await.unwrap();
        aggregator.record_success(&batches[0], &two_new()).await.unwrap();

        let run = store.get_run(batches[0].run_id).await.unwrap().unwrap();
        assert_eq!(run.total_imported, 2);
        assert_eq!(run.completed_batches, 1);
        assert!(!run.status.is_terminal());
    }

    #[tokio::test]
    async fn test_terminal_failure_fails_run() {
        let store = Arc::new(MemoryStore::new());
        let batches = run_with_batches(&store, 2).await;
        let aggregator = RunAggregator::new(store.clone());

        aggregator.record_failure(&batches[0], "timed out").await.unwrap();
        let status = aggregator.record_success(&batches[1], &two_new()).await.unwrap();
        assert_eq!(status, Some(RunStatus::Failed));

        let run = store.get_run(batches[0].run_id).await.unwrap().unwrap();
        assert_eq!(run.failed_count, 2);
        assert_eq!(run.new_count, 2);
        assert_eq!(run.failures.len(), 2);
        assert_eq!(run.failures[0].detail.as_deref(), Some("timed out"));
        assert!(run.counters_balanced());
    }
}
