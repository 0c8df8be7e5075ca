//! Worker pool
//!
//! A fixed number of worker tasks claim batches from the queue and run them
//! through the [`BatchProcessor`]. Each attempt holds the batch lock and
//! heartbeats it until the attempt ends. A separate task sweeps for batches
//! whose lock expired without a heartbeat.
//!
//! Shutdown stops claiming new work; attempts already running finish first.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregator::RunAggregator;
use super::error::BatchExecutionError;
use super::processor::BatchProcessor;
use super::queue::{ClaimedBatch, QueueBackend, StalledBatch};
use super::retry::{RetryDecision, RetryPolicy};
use super::store::StoreError;
use super::types::{Batch, BatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of batches processed in parallel
    pub concurrency: usize,
    pub batch_timeout: Duration,
    /// Must match the queue's lock duration; heartbeats go out at half of it
    pub lock_duration: Duration,
    pub stall_check_interval: Duration,
    pub max_stalled_count: u32,
    /// Idle wait between claims when the queue is empty
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_timeout: Duration::from_secs(60),
            lock_duration: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(30),
            max_stalled_count: 3,
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn QueueBackend>,
    processor: BatchProcessor,
    aggregator: RunAggregator,
    policy: RetryPolicy,
    config: WorkerPoolConfig,
}

/// Running pool; dropping it without [`shutdown`](Self::shutdown) leaves the
/// tasks running until the runtime stops
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop claiming and wait for in-flight attempts
    pub async fn shutdown(self) {
        info!("Stopping worker pool");
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        info!("Worker pool stopped");
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        processor: BatchProcessor,
        aggregator: RunAggregator,
        policy: RetryPolicy,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            aggregator,
            policy,
            config,
        }
    }

    pub fn start(self) -> WorkerPoolHandle {
        let cancel = CancellationToken::new();
        let concurrency = self.config.concurrency.max(1);
        let pool = Arc::new(self);

        let mut tasks = Vec::with_capacity(concurrency + 1);
        for worker in 0..concurrency {
            tasks.push(tokio::spawn(pool.clone().run_worker(worker, cancel.clone())));
        }
        tasks.push(tokio::spawn(pool.clone().check_stalled(cancel.clone())));

        info!(
            concurrency,
            max_attempts = pool.policy.max_attempts,
            batch_timeout_ms = pool.config.batch_timeout.as_millis() as u64,
            "Worker pool started"
        );

        WorkerPoolHandle { cancel, tasks }
    }

    async fn run_worker(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        debug!(worker, "Worker started");

        while !cancel.is_cancelled() {
            match self.queue.claim().await {
                Ok(Some(claimed)) => {
                    self.execute(worker, claimed).await;
                    continue;
                },
                Ok(None) => {},
                Err(e) => warn!(worker, error = %e, "Failed to claim batch"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {},
            }
        }

        debug!(worker, "Worker stopped");
    }

    async fn execute(&self, worker: usize, claimed: ClaimedBatch) {
        let batch = &claimed.batch;
        debug!(
            worker,
            run_id = %batch.run_id,
            sequence = batch.sequence_number,
            total_batches = batch.total_batches,
            attempt = claimed.attempt,
            max_attempts = claimed.max_attempts,
            records = batch.records.len(),
            "Batch claimed"
        );

        let heartbeat = self.start_heartbeat(claimed.id, claimed.lock_token);
        let outcome = self.attempt(batch).await;
        let outcome = match outcome {
            Ok(result) => self
                .aggregator
                .record_success(batch, &result)
                .await
                .map_err(BatchExecutionError::from),
            Err(e) => Err(e),
        };
        heartbeat.abort();

        match outcome {
            Ok(_) => match self.queue.complete(claimed.id, claimed.lock_token).await {
                Ok(true) => {},
                Ok(false) => warn!(
                    batch_id = %claimed.id,
                    "Batch lock lost before completion"
                ),
                Err(e) => warn!(batch_id = %claimed.id, error = %e, "Failed to complete batch"),
            },
            Err(e) => self.handle_failure(&claimed, e).await,
        }
    }

    /// Run the processor in its own task so a panic or timeout cannot take
    /// the worker down with it
    async fn attempt(&self, batch: &Batch) -> Result<BatchResult, BatchExecutionError> {
        let processor = self.processor.clone();
        let owned = batch.clone();
        let mut handle = tokio::spawn(async move { processor.process(&owned).await });

        match timeout(self.config.batch_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(BatchExecutionError::Panicked(join_error.to_string())),
            Err(_) => {
                handle.abort();
                Err(BatchExecutionError::Timeout(self.config.batch_timeout))
            },
        }
    }

    fn start_heartbeat(&self, id: Uuid, lock_token: Uuid) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let every = (self.config.lock_duration / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            timer.tick().await;

            loop {
                timer.tick().await;
                match queue.heartbeat(id, lock_token).await {
                    Ok(true) => {},
                    Ok(false) => {
                        warn!(batch_id = %id, "Batch lock no longer held, stopping heartbeat");
                        break;
                    },
                    Err(e) => warn!(batch_id = %id, error = %e, "Heartbeat failed"),
                }
            }
        })
    }

    async fn handle_failure(&self, claimed: &ClaimedBatch, failure: BatchExecutionError) {
        let batch = &claimed.batch;
        let message = failure.to_string();
        let policy = RetryPolicy {
            max_attempts: claimed.max_attempts,
            ..self.policy
        };

        match policy.decide(claimed.attempt) {
            RetryDecision::Retry(delay) => {
                warn!(
                    run_id = %batch.run_id,
                    sequence = batch.sequence_number,
                    attempt = claimed.attempt,
                    max_attempts = claimed.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "Batch attempt failed, retrying"
                );
                self.release(claimed, delay, &message).await;
            },
            RetryDecision::GiveUp => {
                error!(
                    run_id = %batch.run_id,
                    sequence = batch.sequence_number,
                    attempts = claimed.attempt,
                    error = %message,
                    "Batch failed permanently"
                );

                match self.aggregator.record_failure(batch, &message).await {
                    Ok(_) => {},
                    Err(StoreError::RunNotFound(_)) => {
                        warn!(
                            run_id = %batch.run_id,
                            sequence = batch.sequence_number,
                            "Run no longer exists, dropping batch"
                        );
                    },
                    Err(e) => {
                        // Keep the batch queued so its run still reaches a terminal status
                        error!(
                            run_id = %batch.run_id,
                            sequence = batch.sequence_number,
                            error = %e,
                            "Failed to record batch failure, requeueing"
                        );
                        self.release(claimed, policy.max_delay, &message).await;
                        return;
                    },
                }

                match self.queue.fail(claimed.id, claimed.lock_token, &message).await {
                    Ok(true) => {},
                    Ok(false) => warn!(batch_id = %claimed.id, "Batch lock lost before failing"),
                    Err(e) => warn!(batch_id = %claimed.id, error = %e, "Failed to mark batch failed"),
                }
            },
        }
    }

    async fn release(&self, claimed: &ClaimedBatch, delay: Duration, message: &str) {
        match self
            .queue
            .retry(claimed.id, claimed.lock_token, delay, message)
            .await
        {
            Ok(true) => {},
            Ok(false) => warn!(batch_id = %claimed.id, "Batch lock lost before retry"),
            Err(e) => warn!(batch_id = %claimed.id, error = %e, "Failed to requeue batch"),
        }
    }

    async fn check_stalled(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer = interval(self.config.stall_check_interval.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Stalled-out batches whose failure could not be folded yet
        let mut unrecorded: Vec<StalledBatch> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {},
            }

            match self.queue.reclaim_stalled(self.config.max_stalled_count).await {
                Ok(report) => {
                    if report.requeued > 0 {
                        warn!(requeued = report.requeued, "Requeued stalled batches");
                    }
                    unrecorded.extend(report.failed);
                },
                Err(e) => warn!(error = %e, "Stall check failed"),
            }

            let mut still_unrecorded = Vec::new();
            for stalled in unrecorded.drain(..) {
                let message = format!("Batch stalled {} times", stalled.stalled_count);
                error!(
                    run_id = %stalled.batch.run_id,
                    sequence = stalled.batch.sequence_number,
                    stalled_count = stalled.stalled_count,
                    "Batch failed permanently"
                );

                if let Err(e) = self.aggregator.record_failure(&stalled.batch, &message).await {
                    warn!(
                        run_id = %stalled.batch.run_id,
                        error = %e,
                        "Failed to record stalled batch, will retry"
                    );
                    if !matches!(e, StoreError::RunNotFound(_)) {
                        still_unrecorded.push(stalled);
                    }
                }
            }
            unrecorded = still_unrecorded;
        }
    }
}
