//! Jobfeed Server - Main entry point

use anyhow::{Context, Result};
use jobfeed_common::logging::{init_logging, LogConfig};
use jobfeed_sources::{HttpFeedAdapter, HttpFeedConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use jobfeed_server::{
    app::{create_router, AppState, Backends, Pipeline},
    config::Config,
    error::StartupError,
    import::{scheduler::parse_cron, ImportConfig, ImportScheduler},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::default()
        .with_file_prefix("jobfeed-server")
        .with_filter_directives("jobfeed_server=debug,tower_http=debug,sqlx=warn")
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting jobfeed server");

    let config = Config::load()?;
    let import_config = ImportConfig::from_env()?;
    info!(
        address = %config.bind_address(),
        backend = ?import_config.backend,
        sources = import_config.sources.len(),
        "Configuration loaded"
    );

    // Store or queue unreachable at start is fatal
    let backends = Backends::connect(&import_config, &config.database)
        .await
        .context("Failed to initialize import backends")?;

    let adapter = Arc::new(
        HttpFeedAdapter::new(HttpFeedConfig::default()).context("Failed to build HTTP client")?,
    );
    let pipeline = Pipeline::new(&import_config, &backends, adapter);
    let workers = pipeline.workers.start();

    let scheduler = if import_config.schedule_enabled {
        let schedule = parse_cron(&import_config.cron_schedule)
            .with_context(|| format!("Invalid cron schedule '{}'", import_config.cron_schedule))?;
        info!(schedule = %import_config.cron_schedule, "Scheduled imports enabled");
        Some(ImportScheduler::start(
            pipeline.orchestrator.clone(),
            schedule,
            workers.cancellation_token(),
        ))
    } else {
        info!("Scheduled imports disabled (IMPORT_SCHEDULE_ENABLED=false)");
        None
    };

    let app = create_router(
        AppState {
            orchestrator: pipeline.orchestrator.clone(),
            db: backends.db.clone(),
        },
        &config.cors,
    );

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    info!("Server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining workers");

    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(drain_timeout, workers.shutdown()).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Workers did not stop in time; unfinished batches will be reclaimed as stalled"
        );
    }

    // The scheduler shares the worker pool's cancellation token
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }

    if let Some(pool) = backends.db {
        pool.close().await;
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
