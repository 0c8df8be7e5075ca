//! In-process queue
//!
//! Uses `tokio::time::Instant` for lock expiry and retry delays so tests can
//! drive it with a paused clock.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    ClaimedBatch, QueueBackend, QueueError, QueueSettings, StallReport, StalledBatch,
    SubmitOptions,
};
use crate::import::types::{Batch, QueueSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    batch: Batch,
    priority: i32,
    status: ItemStatus,
    attempts_made: u32,
    max_attempts: u32,
    stalled_count: u32,
    lock_token: Option<Uuid>,
    lock_expires_at: Option<Instant>,
    available_at: Instant,
    last_error: Option<String>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Uuid, Entry>,
    next_seq: u64,
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
}

impl State {
    fn locked_mut(&mut self, id: Uuid, lock_token: Uuid) -> Option<&mut Entry> {
        self.entries
            .get_mut(&id)
            .filter(|e| e.status == ItemStatus::Active && e.lock_token == Some(lock_token))
    }

    fn finish(&mut self, id: Uuid, status: ItemStatus, settings: &QueueSettings) {
        let (retained, keep) = match status {
            ItemStatus::Completed => (&mut self.completed, settings.keep_completed),
            ItemStatus::Failed => (&mut self.failed, settings.keep_failed),
            _ => return,
        };

        retained.push_back(id);
        while retained.len() > keep {
            if let Some(old) = retained.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

pub struct MemoryQueue {
    state: Mutex<State>,
    settings: QueueSettings,
}

impl MemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(State::default()),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last recorded error of a retained batch
    pub fn last_error(&self, id: Uuid) -> Option<String> {
        self.lock().entries.get(&id).and_then(|e| e.last_error.clone())
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn submit(&self, batch: Batch, options: SubmitOptions) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        state.entries.insert(
            id,
            Entry {
                seq,
                batch,
                priority: options.priority,
                status: ItemStatus::Waiting,
                attempts_made: 0,
                max_attempts: options.max_attempts,
                stalled_count: 0,
                lock_token: None,
                lock_expires_at: None,
                available_at: Instant::now(),
                last_error: None,
            },
        );

        Ok(id)
    }

    async fn claim(&self) -> Result<Option<ClaimedBatch>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();

        let next = state
            .entries
            .iter()
            .filter(|(_, e)| e.status == ItemStatus::Waiting && e.available_at <= now)
            .min_by_key(|(_, e)| (e.priority, e.seq))
            .map(|(id, _)| *id);

        let Some(id) = next else {
            return Ok(None);
        };

        let lock_token = Uuid::new_v4();
        let lock_duration = self.settings.lock_duration;
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(None);
        };

        entry.status = ItemStatus::Active;
        entry.lock_token = Some(lock_token);
        entry.lock_expires_at = Some(now + lock_duration);

        Ok(Some(ClaimedBatch {
            id,
            batch: entry.batch.clone(),
            attempt: entry.attempts_made + 1,
            max_attempts: entry.max_attempts,
            lock_token,
        }))
    }

    async fn heartbeat(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
        let lock_duration = self.settings.lock_duration;
        let mut state = self.lock();

        Ok(match state.locked_mut(id, lock_token) {
            Some(entry) => {
                entry.lock_expires_at = Some(Instant::now() + lock_duration);
                true
            },
            None => false,
        })
    }

    async fn complete(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
        let mut state = self.lock();

        let Some(entry) = state.locked_mut(id, lock_token) else {
            return Ok(false);
        };
        entry.status = ItemStatus::Completed;
        entry.lock_token = None;
        entry.lock_expires_at = None;

        state.finish(id, ItemStatus::Completed, &self.settings);
        Ok(true)
    }

    async fn retry(
        &self,
        id: Uuid,
        lock_token: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError> {
        let mut state = self.lock();

        let Some(entry) = state.locked_mut(id, lock_token) else {
            return Ok(false);
        };
        entry.status = ItemStatus::Waiting;
        entry.attempts_made += 1;
        entry.lock_token = None;
        entry.lock_expires_at = None;
        entry.available_at = Instant::now() + delay;
        entry.last_error = Some(error.to_string());

        Ok(true)
    }

    async fn fail(&self, id: Uuid, lock_token: Uuid, error: &str) -> Result<bool, QueueError> {
        let mut state = self.lock();

        let Some(entry) = state.locked_mut(id, lock_token) else {
            return Ok(false);
        };
        entry.status = ItemStatus::Failed;
        entry.attempts_made += 1;
        entry.lock_token = None;
        entry.lock_expires_at = None;
        entry.last_error = Some(error.to_string());

        state.finish(id, ItemStatus::Failed, &self.settings);
        Ok(true)
    }

    async fn reclaim_stalled(&self, max_stalled: u32) -> Result<StallReport, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut report = StallReport::default();
        let mut failed_ids = Vec::new();

        for (id, entry) in state.entries.iter_mut() {
            let expired = entry.status == ItemStatus::Active
                && entry.lock_expires_at.is_some_and(|at| at <= now);
            if !expired {
                continue;
            }

            entry.stalled_count += 1;
            entry.lock_token = None;
            entry.lock_expires_at = None;

            if entry.stalled_count >= max_stalled {
                entry.status = ItemStatus::Failed;
                entry.last_error = Some(format!("stalled {} times", entry.stalled_count));
                report.failed.push(StalledBatch {
                    id: *id,
                    batch: entry.batch.clone(),
                    stalled_count: entry.stalled_count,
                });
                failed_ids.push(*id);
            } else {
                entry.status = ItemStatus::Waiting;
                entry.available_at = now;
                report.requeued += 1;
            }
        }

        for id in failed_ids {
            state.finish(id, ItemStatus::Failed, &self.settings);
        }

        Ok(report)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let state = self.lock();
        let mut snapshot = QueueSnapshot::default();

        for entry in state.entries.values() {
            match entry.status {
                ItemStatus::Waiting => snapshot.waiting += 1,
                ItemStatus::Active => snapshot.active += 1,
                ItemStatus::Completed => snapshot.completed += 1,
                ItemStatus::Failed => snapshot.failed += 1,
            }
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobfeed_common::JobPosting;

    fn batch(sequence_number: i32) -> Batch {
        Batch {
            run_id: Uuid::new_v4(),
            sequence_number,
            total_batches: 3,
            records: vec![JobPosting::new(
                format!("job-{sequence_number}"),
                "Title",
                "https://feed.example",
            )],
            source_url: "https://feed.example".to_string(),
            run_started_at: Utc::now(),
        }
    }

    fn queue() -> MemoryQueue {
        MemoryQueue::new(QueueSettings {
            lock_duration: Duration::from_secs(30),
            keep_completed: 2,
            keep_failed: 2,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_respects_priority_then_fifo() {
        let queue = queue();
        queue.submit(batch(1), SubmitOptions::default()).await.unwrap();
        queue.submit(batch(2), SubmitOptions::default()).await.unwrap();
        queue
            .submit(
                batch(3),
                SubmitOptions {
                    priority: 0,
                    max_attempts: 3,
                },
            )
            .await
            .unwrap();

        let order: Vec<i32> = [
            queue.claim().await.unwrap().unwrap(),
            queue.claim().await.unwrap().unwrap(),
            queue.claim().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|c| c.batch.sequence_number)
        .collect();

        assert_eq!(order, vec![3, 1, 2]);
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_and_attempt_numbering() {
        let queue = queue();
        let id = queue.submit(batch(1), SubmitOptions::default()).await.unwrap();

        let first = queue.claim().await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        assert!(queue
            .retry(id, first.lock_token, Duration::from_secs(5), "boom")
            .await
            .unwrap());

        assert!(queue.claim().await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(5)).await;

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(queue.last_error(id).as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_rejected() {
        let queue = queue();
        let id = queue.submit(batch(1), SubmitOptions::default()).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();

        assert!(!queue.complete(id, Uuid::new_v4()).await.unwrap());
        assert!(!queue.heartbeat(id, Uuid::new_v4()).await.unwrap());
        assert!(queue.complete(id, claimed.lock_token).await.unwrap());
        assert!(!queue.complete(id, claimed.lock_token).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_prevents_stall() {
        let queue = queue();
        let id = queue.submit(batch(1), SubmitOptions::default()).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(queue.heartbeat(id, claimed.lock_token).await.unwrap());
        tokio::time::advance(Duration::from_secs(20)).await;

        let report = queue.reclaim_stalled(3).await.unwrap();
        assert_eq!(report.requeued, 0);
        assert!(report.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_batch_requeued_then_failed() {
        let queue = queue();
        let id = queue.submit(batch(1), SubmitOptions::default()).await.unwrap();

        let first = queue.claim().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let report = queue.reclaim_stalled(2).await.unwrap();
        assert_eq!(report.requeued, 1);

        // The stalled worker no longer owns the batch
        assert!(!queue.complete(id, first.lock_token).await.unwrap());

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.attempt, 1);
        tokio::time::advance(Duration::from_secs(31)).await;

        let report = queue.reclaim_stalled(2).await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].stalled_count, 2);
        assert_eq!(queue.snapshot().await.unwrap().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_and_snapshot() {
        let queue = queue();
        for seq in 1..=4 {
            queue.submit(batch(seq), SubmitOptions::default()).await.unwrap();
        }
        queue.submit(batch(5), SubmitOptions::default()).await.unwrap();

        for _ in 0..3 {
            let claimed = queue.claim().await.unwrap().unwrap();
            queue.complete(claimed.id, claimed.lock_token).await.unwrap();
        }
        let _active = queue.claim().await.unwrap().unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(
            snapshot,
            QueueSnapshot {
                waiting: 1,
                active: 1,
                completed: 2,
                failed: 0,
            }
        );
    }
}
