//! Common test utilities for jobfeed server integration tests
//!
//! - [`TestPostgres`]: a throwaway PostgreSQL container with migrations applied
//! - [`StaticFeeds`]: a source adapter serving canned postings
//! - helpers to wait on runs and build postings

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobfeed_common::JobPosting;
use jobfeed_server::import::{ImportRun, RunStore};
use jobfeed_sources::{SourceAdapter, SourceFetchError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container with migrations pre-applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,jobfeed_server=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Feeds
// ============================================================================

/// `n` valid postings with ids `{prefix}-0 .. {prefix}-{n-1}`
pub fn postings(prefix: &str, n: usize) -> Vec<JobPosting> {
    (0..n)
        .map(|i| {
            JobPosting::new(
                format!("{prefix}-{i}"),
                format!("Job {prefix} {i}"),
                format!("https://{prefix}.example/rss"),
            )
            .with_company("Acme")
            .with_location("Remote")
            .with_description(format!("Opening {i} posted by {prefix}"))
        })
        .collect()
}

/// Source adapter answering from a fixed map; unknown feeds fail with 503
#[derive(Default)]
pub struct StaticFeeds {
    feeds: Mutex<HashMap<String, Vec<JobPosting>>>,
    fetches: AtomicUsize,
}

impl StaticFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, url: &str, records: Vec<JobPosting>) -> Self {
        self.set_feed(url, records);
        self
    }

    pub fn set_feed(&self, url: &str, records: Vec<JobPosting>) {
        self.feeds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.to_string(), records);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StaticFeeds {
    async fn fetch(&self, source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(source_url)
            .cloned()
            .ok_or_else(|| SourceFetchError::Status {
                url: source_url.to_string(),
                status: 503,
            })
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Poll until the run is completed or failed
pub async fn wait_for_terminal(runs: &dyn RunStore, id: Uuid, within: Duration) -> ImportRun {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let run = runs
            .get_run(id)
            .await
            .expect("get_run failed")
            .expect("run missing");
        if run.status.is_terminal() {
            return run;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {} still {:?} after {:?}: {:?}",
            id,
            run.status,
            within,
            run
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
