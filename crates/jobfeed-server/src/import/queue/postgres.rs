//! PostgreSQL queue
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so concurrent workers (in this
//! process or others) never receive the same waiting batch.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ClaimedBatch, QueueBackend, QueueError, QueueSettings, StallReport, StalledBatch,
    SubmitOptions,
};
use crate::import::types::{Batch, QueueSnapshot};

#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    payload: Json<Batch>,
    attempts_made: i32,
    max_attempts: i32,
}

#[derive(sqlx::FromRow)]
struct StallRow {
    id: Uuid,
    status: String,
    payload: Json<Batch>,
    stalled_count: i32,
}

/// Batch queue backed by the `import_batches` table
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    settings: QueueSettings,
}

impl PgQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }

    fn lock_millis(&self) -> i64 {
        i64::try_from(self.settings.lock_duration.as_millis()).unwrap_or(i64::MAX)
    }

    /// Drop finished rows beyond the retention limit for `status`
    /// Drop the oldest finished batches beyond `keep`. Runs after the state
    /// change has committed, so a failure here is logged and not returned.
    async fn trim(&self, status: &str, keep: usize) {
        let removed = sqlx::query(
            r#"
            DELETE FROM import_batches
            WHERE status = $1
              AND id NOT IN (
                  SELECT id FROM import_batches
                  WHERE status = $1
                  ORDER BY finished_at DESC
                  LIMIT $2
              )
            "#,
        )
        .bind(status)
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await;

        match removed {
            Ok(done) if done.rows_affected() > 0 => {
                debug!(status, removed = done.rows_affected(), "Trimmed finished batches");
            },
            Ok(_) => {},
            Err(e) => warn!(status, error = %e, "Failed to trim finished batches"),
        }
    }
}

#[async_trait]
impl QueueBackend for PgQueue {
    async fn submit(&self, batch: Batch, options: SubmitOptions) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO import_batches (
                id, run_id, sequence_number, payload, priority, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(batch.run_id)
        .bind(batch.sequence_number)
        .bind(Json(&batch))
        .bind(options.priority)
        .bind(i32::try_from(options.max_attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim(&self) -> Result<Option<ClaimedBatch>, QueueError> {
        let lock_token = Uuid::new_v4();

        let row: Option<ClaimRow> = sqlx::query_as(
            r#"
            UPDATE import_batches
            SET status = 'active',
                lock_token = $1,
                lock_expires_at = NOW() + ($2::bigint * INTERVAL '1 millisecond')
            WHERE id = (
                SELECT id FROM import_batches
                WHERE status = 'waiting' AND available_at <= NOW()
                ORDER BY priority, seq
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, attempts_made, max_attempts
            "#,
        )
        .bind(lock_token)
        .bind(self.lock_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ClaimedBatch {
            id: row.id,
            batch: row.payload.0,
            attempt: u32::try_from(row.attempts_made).unwrap_or(0) + 1,
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
            lock_token,
        }))
    }

    async fn heartbeat(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET lock_expires_at = NOW() + ($3::bigint * INTERVAL '1 millisecond')
            WHERE id = $1 AND lock_token = $2 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .bind(self.lock_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: Uuid, lock_token: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = 'completed',
                lock_token = NULL,
                lock_expires_at = NULL,
                finished_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;

        let done = result.rows_affected() == 1;
        if done {
            self.trim("completed", self.settings.keep_completed).await;
        }
        Ok(done)
    }

    async fn retry(
        &self,
        id: Uuid,
        lock_token: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = 'waiting',
                attempts_made = attempts_made + 1,
                lock_token = NULL,
                lock_expires_at = NULL,
                available_at = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
                last_error = $4
            WHERE id = $1 AND lock_token = $2 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .bind(delay_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: Uuid, lock_token: Uuid, error: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = 'failed',
                attempts_made = attempts_made + 1,
                lock_token = NULL,
                lock_expires_at = NULL,
                last_error = $3,
                finished_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .bind(error)
        .execute(&self.pool)
        .await?;

        let done = result.rows_affected() == 1;
        if done {
            self.trim("failed", self.settings.keep_failed).await;
        }
        Ok(done)
    }

    async fn reclaim_stalled(&self, max_stalled: u32) -> Result<StallReport, QueueError> {
        let max_stalled = i32::try_from(max_stalled).unwrap_or(i32::MAX);

        // SET expressions see the pre-update row
        let rows: Vec<StallRow> = sqlx::query_as(
            r#"
            UPDATE import_batches
            SET stalled_count = stalled_count + 1,
                status = CASE
                    WHEN stalled_count + 1 >= $1 THEN 'failed'
                    ELSE 'waiting'
                END,
                finished_at = CASE
                    WHEN stalled_count + 1 >= $1 THEN NOW()
                    ELSE NULL
                END,
                last_error = CASE
                    WHEN stalled_count + 1 >= $1 THEN 'stalled ' || (stalled_count + 1) || ' times'
                    ELSE last_error
                END,
                available_at = NOW(),
                lock_token = NULL,
                lock_expires_at = NULL
            WHERE status = 'active' AND lock_expires_at <= NOW()
            RETURNING id, status, payload, stalled_count
            "#,
        )
        .bind(max_stalled)
        .fetch_all(&self.pool)
        .await?;

        let mut report = StallReport::default();
        for row in rows {
            if row.status == "failed" {
                report.failed.push(StalledBatch {
                    id: row.id,
                    batch: row.payload.0,
                    stalled_count: u32::try_from(row.stalled_count).unwrap_or(0),
                });
            } else {
                report.requeued += 1;
            }
        }

        if !report.failed.is_empty() {
            self.trim("failed", self.settings.keep_failed).await;
        }

        Ok(report)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM import_batches GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut snapshot = QueueSnapshot::default();
        for (status, count) in rows {
            match status.as_str() {
                "waiting" => snapshot.waiting = count,
                "active" => snapshot.active = count,
                "completed" => snapshot.completed = count,
                "failed" => snapshot.failed = count,
                _ => {},
            }
        }

        Ok(snapshot)
    }
}
