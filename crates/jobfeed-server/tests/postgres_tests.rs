//! PostgreSQL store and queue tests
//!
//! These need Docker for the test container. Run with:
//! `cargo test -p jobfeed-server --test postgres_tests -- --ignored`

mod common;

use common::{init_test_tracing, postings, wait_for_terminal, StaticFeeds, TestPostgres};
use jobfeed_server::app::{Backends, Pipeline};
use jobfeed_server::import::orchestrator::split_into_batches;
use jobfeed_server::import::queue::{QueueSettings, SubmitOptions};
use jobfeed_server::import::types::UpsertOutcome;
use jobfeed_server::import::{
    BatchResult, ImportBackend, ImportConfig, ImportRun, JobStore, PgQueue, PgStore,
    QueueBackend, RunStatus, RunStore,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

const FEED: &str = "https://pg.example/rss";

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_upsert_insert_then_update() {
    init_test_tracing();
    let pg = TestPostgres::start().await.unwrap();
    let store = PgStore::new(pg.pool_clone());

    let posting = postings("pg", 1).remove(0);
    let first = store.upsert_job(&posting, FEED).await.unwrap();
    assert_eq!(first, UpsertOutcome::New);

    let mut changed = posting.clone();
    changed.title = "Principal Engineer".to_string();
    let second = store
        .upsert_job(&changed, "https://other.example/rss")
        .await
        .unwrap();
    assert_eq!(second, UpsertOutcome::Updated);

    let stored = store.get_job(&posting.external_id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Principal Engineer");
    assert_eq!(stored.location.as_deref(), Some("Remote"));
    assert_eq!(stored.source_url, "https://other.example/rss");
    assert!(stored.updated_at >= stored.created_at);
    assert_eq!(store.count_jobs().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_concurrent_upserts_same_id() {
    let pg = TestPostgres::start().await.unwrap();
    let store = Arc::new(PgStore::new(pg.pool_clone()));
    let posting = postings("race", 1).remove(0);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let posting = posting.clone();
            tokio::spawn(async move { store.upsert_job(&posting, FEED).await })
        })
        .collect();

    let mut new = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() == UpsertOutcome::New {
            new += 1;
        }
    }

    assert_eq!(new, 1);
    assert_eq!(store.count_jobs().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_run_fold_and_finalize() {
    let pg = TestPostgres::start().await.unwrap();
    let store = PgStore::new(pg.pool_clone());

    let run = ImportRun::new(FEED, 4, 2);
    store.create_run(&run).await.unwrap();
    assert!(store.mark_processing(run.id).await.unwrap());
    assert!(!store.mark_processing(run.id).await.unwrap());

    let result = BatchResult {
        new: 2,
        ..BatchResult::default()
    };
    let progress = store.fold_batch(run.id, 2, &result, false).await.unwrap();
    assert!(progress.applied);
    assert_eq!(progress.completed_batches, 1);

    let repeat = store.fold_batch(run.id, 2, &result, false).await.unwrap();
    assert!(!repeat.applied);
    assert_eq!(repeat.completed_batches, 1);

    let updated = BatchResult {
        updated: 2,
        ..BatchResult::default()
    };
    let progress = store.fold_batch(run.id, 1, &updated, false).await.unwrap();
    assert_eq!(progress.completed_batches, 2);

    let finished_at = chrono::Utc::now();
    assert!(store
        .finalize_run(run.id, RunStatus::Completed, finished_at, 42)
        .await
        .unwrap());
    assert!(!store
        .finalize_run(run.id, RunStatus::Failed, finished_at, 43)
        .await
        .unwrap());

    let stored = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.new_count, 2);
    assert_eq!(stored.updated_count, 2);
    assert_eq!(stored.total_imported, 4);
    assert_eq!(stored.duration_ms, Some(42));
    assert!(stored.counters_balanced());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_queue_claim_complete_and_stale_token() {
    let pg = TestPostgres::start().await.unwrap();
    let queue = PgQueue::new(pg.pool_clone(), QueueSettings::default());

    let run = ImportRun::new(FEED, 3, 1);
    let batch = split_into_batches(&run, postings("q", 3), 10).remove(0);
    let id = queue.submit(batch, SubmitOptions::default()).await.unwrap();

    let claimed = queue.claim().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.attempt, 1);
    assert_eq!(claimed.batch.records.len(), 3);
    assert!(queue.claim().await.unwrap().is_none());

    assert!(queue.heartbeat(id, claimed.lock_token).await.unwrap());
    assert!(!queue.complete(id, uuid::Uuid::new_v4()).await.unwrap());
    assert!(queue.complete(id, claimed.lock_token).await.unwrap());

    let snapshot = queue.snapshot().await.unwrap();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.waiting, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_queue_retry_and_stall() {
    let pg = TestPostgres::start().await.unwrap();
    let queue = PgQueue::new(
        pg.pool_clone(),
        QueueSettings {
            lock_duration: Duration::from_millis(100),
            ..QueueSettings::default()
        },
    );

    let run = ImportRun::new(FEED, 2, 1);
    let batch = split_into_batches(&run, postings("s", 2), 10).remove(0);
    queue.submit(batch, SubmitOptions::default()).await.unwrap();

    let first = queue.claim().await.unwrap().unwrap();
    assert!(queue
        .retry(first.id, first.lock_token, Duration::ZERO, "transient")
        .await
        .unwrap());

    let second = queue.claim().await.unwrap().unwrap();
    assert_eq!(second.attempt, 2);

    // Let the lock lapse without a heartbeat
    tokio::time::sleep(Duration::from_millis(250)).await;
    let report = queue.reclaim_stalled(1).await.unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].batch.run_id, run.id);

    assert!(!queue
        .complete(second.id, second.lock_token)
        .await
        .unwrap());
    assert_eq!(queue.snapshot().await.unwrap().failed, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_queue_survives_failed_trim() {
    let pg = TestPostgres::start().await.unwrap();
    let pool = pg.pool_clone();

    // Any delete of a finished batch now errors
    sqlx::query(
        r#"
        CREATE FUNCTION refuse_batch_delete() RETURNS trigger AS $$
        BEGIN
            RAISE EXCEPTION 'batch deletes are disabled';
        END
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER refuse_batch_delete BEFORE DELETE ON import_batches \
         FOR EACH ROW EXECUTE FUNCTION refuse_batch_delete()",
    )
    .execute(&pool)
    .await
    .unwrap();

    let queue = PgQueue::new(
        pool,
        QueueSettings {
            lock_duration: Duration::from_millis(100),
            keep_completed: 0,
            keep_failed: 0,
        },
    );

    let run = ImportRun::new(FEED, 4, 2);
    let mut batches = split_into_batches(&run, postings("t", 4), 2).into_iter();
    let first = batches.next().unwrap();
    let second = batches.next().unwrap();

    queue.submit(first, SubmitOptions::default()).await.unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();
    assert!(queue.complete(claimed.id, claimed.lock_token).await.unwrap());

    queue.submit(second, SubmitOptions::default()).await.unwrap();
    let stalled = queue.claim().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let report = queue.reclaim_stalled(1).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, stalled.id);
    assert_eq!(report.failed[0].batch.sequence_number, 2);

    let snapshot = queue.snapshot().await.unwrap();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pg_pipeline_end_to_end() {
    init_test_tracing();
    let pg = TestPostgres::start().await.unwrap();

    let config = ImportConfig {
        sources: vec![FEED.to_string()],
        backend: ImportBackend::Postgres,
        poll_interval_ms: 10,
        ..ImportConfig::default()
    };
    let backends = Backends::postgres(pg.pool_clone(), &config);
    let feeds = Arc::new(StaticFeeds::new().with_feed(FEED, postings("e2e", 250)));
    let pipeline = Pipeline::new(&config, &backends, feeds);
    let workers = pipeline.workers.start();

    let report = pipeline.orchestrator.trigger().await.unwrap();
    let run = wait_for_terminal(
        backends.runs.as_ref(),
        report.run_ids[0],
        Duration::from_secs(30),
    )
    .await;
    workers.shutdown().await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_batches, 3);
    assert_eq!(run.new_count, 250);
    assert_eq!(backends.jobs.count_jobs().await.unwrap(), 250);
}
