//! Jobfeed Server Library
//!
//! Imports job postings from RSS feeds into PostgreSQL and serves the import
//! history over HTTP.
//!
//! # Overview
//!
//! - **Import pipeline** ([`import`]): fetch feeds, split them into batches,
//!   queue the batches and upsert their records with bounded concurrency,
//!   retries and stall detection
//! - **API** ([`features`]): trigger imports, list runs, read queue counters
//! - **Configuration** ([`config`], [`import::config`]): environment based
//!
//! # Example
//!
//! ```no_run
//! use jobfeed_server::app::{Backends, Pipeline};
//! use jobfeed_server::config::Config;
//! use jobfeed_server::import::ImportConfig;
//! use jobfeed_sources::{HttpFeedAdapter, HttpFeedConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let import_config = ImportConfig::from_env()?;
//!     let backends = Backends::connect(&import_config, &config.database).await?;
//!     let adapter = Arc::new(HttpFeedAdapter::new(HttpFeedConfig::default())?);
//!     let pipeline = Pipeline::new(&import_config, &backends, adapter);
//!
//!     let workers = pipeline.workers.start();
//!     pipeline.orchestrator.trigger().await?;
//!     workers.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod import;
pub mod middleware;

pub use error::{AppError, StartupError};
