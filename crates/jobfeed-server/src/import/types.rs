//! Core types for the import pipeline

use chrono::{DateTime, Utc};
use jobfeed_common::JobPosting;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Import run status
///
/// Transitions only move forward: pending -> processing -> completed | failed.
/// A run whose first batch never starts goes from pending straight to failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => RunStatus::Processing,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

/// One rejected record, kept on the run for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// The offending record as JSON
    pub record: serde_json::Value,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FailureEntry {
    pub fn new(record: &JobPosting, reason: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            record: record.to_payload().unwrap_or_default(),
            reason: reason.into(),
            detail,
        }
    }
}

/// One import of one source (maps to import_runs table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub source_url: String,
    pub total_fetched: i64,
    pub total_batches: i32,
    pub total_imported: i64,
    pub new_count: i64,
    pub updated_count: i64,
    pub failed_count: i64,
    pub failures: Vec<FailureEntry>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub finished_at: Option<DateTime<Utc>>,
    pub completed_batches: i32,
    pub failed_batches: i32,
}

impl ImportRun {
    /// A fresh pending run
    pub fn new(source_url: impl Into<String>, total_fetched: i64, total_batches: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_url: source_url.into(),
            total_fetched,
            total_batches,
            total_imported: 0,
            new_count: 0,
            updated_count: 0,
            failed_count: 0,
            failures: Vec::new(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            duration_ms: None,
            finished_at: None,
            completed_batches: 0,
            failed_batches: 0,
        }
    }

    /// Whether the persisted counters add up
    pub fn counters_balanced(&self) -> bool {
        self.total_imported == self.new_count + self.updated_count + self.failed_count
            && self.total_imported <= self.total_fetched
    }
}

/// A slice of one run's records, the unit of queueing and retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub run_id: Uuid,
    /// 1-based position within the run
    pub sequence_number: i32,
    pub total_batches: i32,
    pub records: Vec<JobPosting>,
    pub source_url: String,
    pub run_started_at: DateTime<Utc>,
}

/// Result of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
}

/// Per-batch statistics produced by the batch processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub new: i64,
    pub updated: i64,
    pub failed: i64,
    pub failures: Vec<FailureEntry>,
}

impl BatchResult {
    pub fn processed(&self) -> i64 {
        self.new + self.updated + self.failed
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::New => self.new += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn record_failure(&mut self, entry: FailureEntry) {
        self.failed += 1;
        self.failures.push(entry);
    }

    /// Every record of a batch that exhausted its attempts counts as failed
    pub fn terminal_failure(batch: &Batch, error: &str) -> Self {
        let mut result = Self::default();
        for record in &batch.records {
            result.record_failure(FailureEntry::new(
                record,
                "Batch failed permanently",
                Some(error.to_string()),
            ));
        }
        result
    }
}

/// Run counters as they stand after a fold
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    /// False when this (run, sequence) had already been folded
    pub applied: bool,
    pub status: RunStatus,
    pub total_batches: i32,
    pub completed_batches: i32,
    pub failed_batches: i32,
    pub started_at: DateTime<Utc>,
}

impl RunProgress {
    pub fn all_batches_done(&self) -> bool {
        self.completed_batches >= self.total_batches
    }
}

/// A job as persisted (maps to jobs table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredJob {
    pub external_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub posted_date: Option<DateTime<Utc>>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time queue counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}
