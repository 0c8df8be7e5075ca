//! In-process store
//!
//! All state sits behind one mutex. Every trait method takes the lock once and
//! never holds it across an await, so each operation is atomic with respect to
//! the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_common::JobPosting;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{JobStore, RunStore, StoreError};
use crate::import::types::{
    BatchResult, ImportRun, RunProgress, RunStatus, StoredJob, UpsertOutcome,
};

#[derive(Default)]
struct State {
    runs: HashMap<Uuid, ImportRun>,
    folded: HashSet<(Uuid, i32)>,
    jobs: HashMap<String, StoredJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    upsert_faults: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` upserts fail with [`StoreError::Unavailable`]
    pub fn fail_next_upserts(&self, count: u32) {
        self.upsert_faults.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self) -> bool {
        self.upsert_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        self.lock().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<ImportRun>, StoreError> {
        let state = self.lock();
        let mut runs: Vec<ImportRun> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(runs)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let run = state.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;

        if run.status == RunStatus::Pending {
            run.status = RunStatus::Processing;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn fold_batch(
        &self,
        id: Uuid,
        sequence_number: i32,
        result: &BatchResult,
        terminal_failure: bool,
    ) -> Result<RunProgress, StoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let run = state.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;

        let applied = !run.status.is_terminal() && state.folded.insert((id, sequence_number));
        if applied {
            run.total_imported += result.processed();
            run.new_count += result.new;
            run.updated_count += result.updated;
            run.failed_count += result.failed;
            run.failures.extend(result.failures.iter().cloned());
            run.completed_batches += 1;
            if terminal_failure {
                run.failed_batches += 1;
            }
        }

        Ok(RunProgress {
            applied,
            status: run.status,
            total_batches: run.total_batches,
            completed_batches: run.completed_batches,
            failed_batches: run.failed_batches,
            started_at: run.started_at,
        })
    }

    async fn finalize_run(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let run = state.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;

        if run.status.is_terminal() {
            return Ok(false);
        }

        run.status = status;
        run.finished_at = Some(finished_at);
        run.duration_ms = Some(duration_ms);
        // Terminal runs take no more folds, so their ledger entries are dead
        state.folded.retain(|(run_id, _)| *run_id != id);
        Ok(true)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_job(
        &self,
        posting: &JobPosting,
        source_url: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        if self.take_fault() {
            return Err(StoreError::Unavailable("injected upsert fault".to_string()));
        }

        let now = Utc::now();
        let mut state = self.lock();

        match state.jobs.get_mut(&posting.external_id) {
            Some(existing) => {
                existing.title = posting.title.clone();
                existing.company = posting.company.clone();
                existing.location = posting.location.clone();
                existing.description = posting.description.clone();
                existing.job_type = posting.job_type.clone();
                existing.category = posting.category.clone();
                existing.url = posting.url.clone();
                existing.posted_date = posting.posted_date;
                existing.source_url = source_url.to_string();
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            },
            None => {
                state.jobs.insert(
                    posting.external_id.clone(),
                    StoredJob {
                        external_id: posting.external_id.clone(),
                        title: posting.title.clone(),
                        company: posting.company.clone(),
                        location: posting.location.clone(),
                        description: posting.description.clone(),
                        job_type: posting.job_type.clone(),
                        category: posting.category.clone(),
                        url: posting.url.clone(),
                        posted_date: posting.posted_date,
                        source_url: source_url.to_string(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::New)
            },
        }
    }

    async fn get_job(&self, external_id: &str) -> Result<Option<StoredJob>, StoreError> {
        Ok(self.lock().jobs.get(external_id).cloned())
    }

    async fn count_jobs(&self) -> Result<i64, StoreError> {
        Ok(self.lock().jobs.len() as i64)
    }
}
