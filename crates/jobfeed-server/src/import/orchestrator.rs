//! Import orchestrator
//!
//! A trigger fetches every configured source, creates one run per source that
//! returned records, splits the records into batches and queues them. It
//! returns as soon as the batches are queued; the worker pool does the rest.

use futures::stream::{self, StreamExt};
use jobfeed_common::JobPosting;
use jobfeed_sources::SourceAdapter;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::ImportError;
use super::queue::{QueueBackend, SubmitOptions, DEFAULT_PRIORITY};
use super::store::{RunStore, StoreError};
use super::types::{Batch, ImportRun, QueueSnapshot, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub batch_size: usize,
    /// Sources fetched at once
    pub fetch_concurrency: usize,
    pub priority: i32,
    pub max_attempts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            fetch_concurrency: 4,
            priority: DEFAULT_PRIORITY,
            max_attempts: 3,
        }
    }
}

/// A source whose fetch failed during a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSource {
    pub url: String,
    pub error: String,
}

/// Outcome of the fetch-and-split phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    /// Runs created, in source order
    pub run_ids: Vec<Uuid>,
    pub failed_sources: Vec<FailedSource>,
    /// Sources that answered with no records
    pub empty_sources: Vec<String>,
}

pub struct ImportOrchestrator {
    sources: Vec<String>,
    adapter: Arc<dyn SourceAdapter>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn QueueBackend>,
    settings: OrchestratorSettings,
}

impl ImportOrchestrator {
    pub fn new(
        sources: Vec<String>,
        adapter: Arc<dyn SourceAdapter>,
        runs: Arc<dyn RunStore>,
        queue: Arc<dyn QueueBackend>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sources,
            adapter,
            runs,
            queue,
            settings,
        }
    }

    /// Fetch all sources and queue their batches.
    ///
    /// Source failures are reported, not returned. Only a failure to create a
    /// run or queue a batch ends the trigger with an error.
    pub async fn trigger(&self) -> Result<TriggerReport, ImportError> {
        info!(sources = self.sources.len(), "Import triggered");

        let fetched: Vec<_> = stream::iter(self.sources.clone())
            .map(|url| {
                let adapter = Arc::clone(&self.adapter);
                async move {
                    let result = adapter.fetch(&url).await;
                    (url, result)
                }
            })
            .buffered(self.settings.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut report = TriggerReport::default();

        for (url, result) in fetched {
            match result {
                Ok(records) if records.is_empty() => {
                    info!(source = %url, "Source returned no records");
                    report.empty_sources.push(url);
                },
                Ok(records) => {
                    let run_id = self.start_run(&url, records).await?;
                    report.run_ids.push(run_id);
                },
                Err(e) => {
                    warn!(source = %url, error = %e, "Source fetch failed");
                    report.failed_sources.push(FailedSource {
                        url,
                        error: e.to_string(),
                    });
                },
            }
        }

        info!(
            runs = report.run_ids.len(),
            failed_sources = report.failed_sources.len(),
            empty_sources = report.empty_sources.len(),
            "Import trigger finished queueing"
        );

        Ok(report)
    }

    /// Run [`trigger`](Self::trigger) in the background
    pub fn spawn_trigger(self: &Arc<Self>) -> JoinHandle<Result<TriggerReport, ImportError>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let result = orchestrator.trigger().await;
            if let Err(e) = &result {
                error!(error = %e, "Import trigger failed");
            }
            result
        })
    }

    async fn start_run(&self, url: &str, records: Vec<JobPosting>) -> Result<Uuid, ImportError> {
        let total_fetched = records.len();
        let batch_count = total_fetched.div_ceil(self.settings.batch_size.max(1));
        let run = ImportRun::new(
            url,
            i64::try_from(total_fetched).unwrap_or(i64::MAX),
            i32::try_from(batch_count).unwrap_or(i32::MAX),
        );
        self.runs.create_run(&run).await?;

        let options = SubmitOptions {
            priority: self.settings.priority,
            max_attempts: self.settings.max_attempts,
        };

        for batch in split_into_batches(&run, records, self.settings.batch_size) {
            if let Err(e) = self.queue.submit(batch, options).await {
                // Batches already queued still run; their outcomes are not
                // folded into the failed run
                self.abandon_run(&run).await;
                return Err(e.into());
            }
        }

        info!(
            run_id = %run.id,
            source = %url,
            total_fetched,
            batches = batch_count,
            "Import run queued"
        );

        Ok(run.id)
    }

    async fn abandon_run(&self, run: &ImportRun) {
        let finished_at = chrono::Utc::now();
        let duration_ms = (finished_at - run.started_at).num_milliseconds().max(0);

        if let Err(e) = self
            .runs
            .finalize_run(run.id, RunStatus::Failed, finished_at, duration_ms)
            .await
        {
            error!(run_id = %run.id, error = %e, "Failed to mark abandoned run failed");
        }
    }

    /// Most recent runs first
    pub async fn history(&self, limit: i64) -> Result<Vec<ImportRun>, StoreError> {
        self.runs.list_runs(limit).await
    }

    pub async fn run(&self, id: Uuid) -> Result<Option<ImportRun>, StoreError> {
        self.runs.get_run(id).await
    }

    pub async fn stats(&self) -> Result<QueueSnapshot, ImportError> {
        Ok(self.queue.snapshot().await?)
    }
}

/// Split `records` into batches of `batch_size`; only the last may be short
pub fn split_into_batches(run: &ImportRun, records: Vec<JobPosting>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let total_batches = i32::try_from(records.len().div_ceil(batch_size)).unwrap_or(i32::MAX);

    let mut batches = Vec::new();
    let mut remaining = records.into_iter().peekable();
    let mut sequence_number = 0;

    while remaining.peek().is_some() {
        sequence_number += 1;
        batches.push(Batch {
            run_id: run.id,
            sequence_number,
            total_batches,
            records: remaining.by_ref().take(batch_size).collect(),
            source_url: run.source_url.clone(),
            run_started_at: run.started_at,
        });
    }

    batches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::aggregator::RunAggregator;
    use crate::import::processor::BatchProcessor;
    use crate::import::queue::{ClaimedBatch, MemoryQueue, QueueError, StallReport};
    use crate::import::store::MemoryStore;
    use crate::import::upserter::RecordUpserter;
    use async_trait::async_trait;
    use jobfeed_sources::SourceFetchError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SOURCE: &str = "https://feed.example/rss";

    fn postings(prefix: &str, n: usize) -> Vec<JobPosting> {
        (0..n)
            .map(|i| JobPosting::new(format!("{prefix}-{i}"), format!("Job {i}"), SOURCE))
            .collect()
    }

    /// Feeds keyed by URL; unknown URLs answer 503
    struct StaticFeeds(HashMap<String, Vec<JobPosting>>);

    #[async_trait]
    impl SourceAdapter for StaticFeeds {
        async fn fetch(&self, source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError> {
            self.0
                .get(source_url)
                .cloned()
                .ok_or_else(|| SourceFetchError::Status {
                    url: source_url.to_string(),
                    status: 503,
                })
        }
    }

    /// Accepts `accept` submits, then reports the queue unavailable
    struct FlakyQueue {
        inner: MemoryQueue,
        accept: usize,
        submitted: AtomicUsize,
    }

    #[async_trait]
    impl QueueBackend for FlakyQueue {
        async fn submit(&self, batch: Batch, options: SubmitOptions) -> Result<Uuid, QueueError> {
            if self.submitted.fetch_add(1, Ordering::SeqCst) >= self.accept {
                return Err(QueueError::Unavailable("connection reset".to_string()));
            }
            self.inner.submit(batch, options).await
        }

        async fn claim(&self) -> Result<Option<ClaimedBatch>, QueueError> {
            self.inner.claim().await
        }

        async fn heartbeat(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
            self.inner.heartbeat(id, lock_token).await
        }

        async fn complete(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
            self.inner.complete(id, lock_token).await
        }

        async fn retry(
            &self,
            id: Uuid,
            lock_token: Uuid,
            delay: Duration,
            error: &str,
        ) -> Result<bool, QueueError> {
            self.inner.retry(id, lock_token, delay, error).await
        }

        async fn fail(&self, id: Uuid, lock_token: Uuid, error: &str) -> Result<bool, QueueError> {
            self.inner.fail(id, lock_token, error).await
        }

        async fn reclaim_stalled(&self, max_stalled: u32) -> Result<StallReport, QueueError> {
            self.inner.reclaim_stalled(max_stalled).await
        }

        async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
            self.inner.snapshot().await
        }
    }

    #[test]
    fn test_split_250_by_100() {
        let run = ImportRun::new(SOURCE, 250, 3);
        let batches = split_into_batches(&run, postings("a", 250), 100);

        let sizes: Vec<usize> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(
            batches.iter().map(|b| b.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(batches.iter().all(|b| b.total_batches == 3 && b.run_id == run.id));
        assert_eq!(batches[2].records[0].external_id, "a-200");
    }

    #[test]
    fn test_split_exact_multiple() {
        let run = ImportRun::new(SOURCE, 200, 2);
        let batches = split_into_batches(&run, postings("a", 200), 100);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.records.len() == 100));
    }

    #[test]
    fn test_split_smaller_than_batch() {
        let run = ImportRun::new(SOURCE, 7, 1);
        let batches = split_into_batches(&run, postings("a", 7), 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_batches, 1);
        assert_eq!(batches[0].records.len(), 7);
    }

    #[tokio::test]
    async fn test_trigger_isolates_failed_and_empty_sources() {
        let mut feeds = HashMap::new();
        feeds.insert("https://a.example".to_string(), postings("a", 3));
        feeds.insert("https://empty.example".to_string(), Vec::new());
        feeds.insert("https://c.example".to_string(), postings("c", 150));

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::default());
        let orchestrator = ImportOrchestrator::new(
            vec![
                "https://a.example".to_string(),
                "https://down.example".to_string(),
                "https://empty.example".to_string(),
                "https://c.example".to_string(),
            ],
            Arc::new(StaticFeeds(feeds)),
            store.clone(),
            queue.clone(),
            OrchestratorSettings::default(),
        );

        let report = orchestrator.trigger().await.unwrap();

        assert_eq!(report.run_ids.len(), 2);
        assert_eq!(report.failed_sources.len(), 1);
        assert_eq!(report.failed_sources[0].url, "https://down.example");
        assert_eq!(report.empty_sources, vec!["https://empty.example".to_string()]);

        let first = store.get_run(report.run_ids[0]).await.unwrap().unwrap();
        assert_eq!(first.source_url, "https://a.example");
        assert_eq!(first.total_fetched, 3);
        assert_eq!(first.total_batches, 1);
        assert_eq!(first.status, RunStatus::Pending);

        let second = store.get_run(report.run_ids[1]).await.unwrap().unwrap();
        assert_eq!(second.total_fetched, 150);
        assert_eq!(second.total_batches, 2);

        assert_eq!(orchestrator.stats().await.unwrap().waiting, 3);
        assert_eq!(orchestrator.history(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partially_queued_run_stays_failed() {
        let mut feeds = HashMap::new();
        feeds.insert(SOURCE.to_string(), postings("p", 250));

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(FlakyQueue {
            inner: MemoryQueue::default(),
            accept: 1,
            submitted: AtomicUsize::new(0),
        });
        let orchestrator = ImportOrchestrator::new(
            vec![SOURCE.to_string()],
            Arc::new(StaticFeeds(feeds)),
            store.clone(),
            queue.clone(),
            OrchestratorSettings::default(),
        );

        let err = orchestrator.trigger().await.unwrap_err();
        assert!(matches!(err, ImportError::Queue(QueueError::Unavailable(_))));

        let runs = store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].total_batches, 3);

        // The one batch that made it into the queue still gets processed
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.batch.sequence_number, 1);
        let processor = BatchProcessor::new(store.clone(), RecordUpserter::new(store.clone()));
        let result = processor.process(&claimed.batch).await.unwrap();
        assert_eq!(result.new, 100);

        let aggregator = RunAggregator::new(store.clone());
        let finished = aggregator.record_success(&claimed.batch, &result).await.unwrap();
        assert_eq!(finished, None);

        let run = store.get_run(runs[0].id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.total_imported, 0);
        assert_eq!(run.completed_batches, 0);
        assert!(run.counters_balanced());
    }
}
