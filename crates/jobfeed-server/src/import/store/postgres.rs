//! PostgreSQL store
//!
//! Counters are incremented in place and the fold ledger
//! (`import_run_batches`) is written in the same transaction, so a batch
//! folded twice changes nothing the second time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_common::JobPosting;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobStore, RunStore, StoreError};
use crate::import::types::{
    BatchResult, FailureEntry, ImportRun, RunProgress, RunStatus, StoredJob, UpsertOutcome,
};

const RUN_COLUMNS: &str = r#"
    id, source_url, total_fetched, total_batches, total_imported,
    new_count, updated_count, failed_count, failures, status,
    started_at, duration_ms, finished_at, completed_batches, failed_batches
"#;

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    source_url: String,
    total_fetched: i64,
    total_batches: i32,
    total_imported: i64,
    new_count: i64,
    updated_count: i64,
    failed_count: i64,
    failures: Json<Vec<FailureEntry>>,
    status: String,
    started_at: DateTime<Utc>,
    duration_ms: Option<i64>,
    finished_at: Option<DateTime<Utc>>,
    completed_batches: i32,
    failed_batches: i32,
}

impl From<RunRow> for ImportRun {
    fn from(row: RunRow) -> Self {
        Self {
            id: row.id,
            source_url: row.source_url,
            total_fetched: row.total_fetched,
            total_batches: row.total_batches,
            total_imported: row.total_imported,
            new_count: row.new_count,
            updated_count: row.updated_count,
            failed_count: row.failed_count,
            failures: row.failures.0,
            status: RunStatus::from(row.status),
            started_at: row.started_at,
            duration_ms: row.duration_ms,
            finished_at: row.finished_at,
            completed_batches: row.completed_batches,
            failed_batches: row.failed_batches,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    status: String,
    total_batches: i32,
    completed_batches: i32,
    failed_batches: i32,
    started_at: DateTime<Utc>,
}

impl ProgressRow {
    fn into_progress(self, applied: bool) -> RunProgress {
        RunProgress {
            applied,
            status: RunStatus::from(self.status),
            total_batches: self.total_batches,
            completed_batches: self.completed_batches,
            failed_batches: self.failed_batches,
            started_at: self.started_at,
        }
    }
}

/// Run and job store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn progress_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<ProgressRow, StoreError> {
        let row = sqlx::query_as(
            r#"
            SELECT status, total_batches, completed_batches, failed_batches, started_at
            FROM import_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    async fn run_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM import_runs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn create_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_runs (
                id, source_url, total_fetched, total_batches, status, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id)
        .bind(&run.source_url)
        .bind(run.total_fetched)
        .bind(run.total_batches)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<ImportRun>, StoreError> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {} FROM import_runs WHERE id = $1", RUN_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(ImportRun::from))
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<ImportRun>, StoreError> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM import_runs ORDER BY started_at DESC LIMIT $1",
            RUN_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ImportRun::from).collect())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'processing'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        if self.run_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::RunNotFound(id))
        }
    }

    async fn fold_batch(
        &self,
        id: Uuid,
        sequence_number: i32,
        result: &BatchResult,
        terminal_failure: bool,
    ) -> Result<RunProgress, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes folds of the same run
        let locked: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_runs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let status = locked.map(RunStatus::from).ok_or(StoreError::RunNotFound(id))?;

        // A finished run keeps the counters it was finalized with
        if status.is_terminal() {
            let row = self.progress_row(&mut tx, id).await?;
            tx.commit().await?;
            return Ok(row.into_progress(false));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO import_run_batches (run_id, sequence_number, terminal_failure)
            VALUES ($1, $2, $3)
            ON CONFLICT (run_id, sequence_number) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(sequence_number)
        .bind(terminal_failure)
        .execute(&mut *tx)
        .await?;

        let applied = inserted.rows_affected() == 1;

        let row: ProgressRow = if applied {
            sqlx::query_as(
                r#"
                UPDATE import_runs
                SET total_imported = total_imported + $2,
                    new_count = new_count + $3,
                    updated_count = updated_count + $4,
                    failed_count = failed_count + $5,
                    failures = failures || $6::jsonb,
                    completed_batches = completed_batches + 1,
                    failed_batches = failed_batches + $7
                WHERE id = $1
                RETURNING status, total_batches, completed_batches, failed_batches, started_at
                "#,
            )
            .bind(id)
            .bind(result.processed())
            .bind(result.new)
            .bind(result.updated)
            .bind(result.failed)
            .bind(Json(&result.failures))
            .bind(if terminal_failure { 1i32 } else { 0i32 })
            .fetch_one(&mut *tx)
            .await?
        } else {
            self.progress_row(&mut tx, id).await?
        };

        tx.commit().await?;

        Ok(row.into_progress(applied))
    }

    async fn finalize_run(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = $2, finished_at = $3, duration_ms = $4
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(finished_at)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        if self.run_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::RunNotFound(id))
        }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn upsert_job(
        &self,
        posting: &JobPosting,
        source_url: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        // xmax is zero only for a freshly inserted tuple
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                external_id, title, company, location, description,
                job_type, category, url, posted_date, source_url,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (external_id) DO UPDATE
            SET title = EXCLUDED.title,
                company = EXCLUDED.company,
                location = EXCLUDED.location,
                description = EXCLUDED.description,
                job_type = EXCLUDED.job_type,
                category = EXCLUDED.category,
                url = EXCLUDED.url,
                posted_date = EXCLUDED.posted_date,
                source_url = EXCLUDED.source_url,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&posting.external_id)
        .bind(&posting.title)
        .bind(&posting.company)
        .bind(&posting.location)
        .bind(&posting.description)
        .bind(&posting.job_type)
        .bind(&posting.category)
        .bind(&posting.url)
        .bind(posting.posted_date)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            UpsertOutcome::New
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn get_job(&self, external_id: &str) -> Result<Option<StoredJob>, StoreError> {
        let job = sqlx::query_as::<_, StoredJob>(
            r#"
            SELECT external_id, title, company, location, description,
                   job_type, category, url, posted_date, source_url,
                   created_at, updated_at
            FROM jobs
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn count_jobs(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
