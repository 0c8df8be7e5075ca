//! Job-feed import pipeline
//!
//! ```text
//! trigger ──► ImportOrchestrator ──fetch──► SourceAdapter (per feed)
//!                  │
//!                  ├── create ImportRun (pending)
//!                  └── submit Batch × N ──► QueueBackend
//!                                              │ claim / heartbeat
//!                                              ▼
//!                                          WorkerPool ──► BatchProcessor ──► RecordUpserter ──► JobStore
//!                                              │
//!                                              └── RunAggregator ──► RunStore (fold, finalize)
//! ```
//!
//! Runs, jobs and the queue each have a PostgreSQL and an in-memory backend
//! behind the traits in [`store`] and [`queue`].

pub mod aggregator;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod upserter;
pub mod worker;

pub use aggregator::RunAggregator;
pub use config::{ImportBackend, ImportConfig};
pub use error::{BatchExecutionError, ImportError, RecordError};
pub use orchestrator::{FailedSource, ImportOrchestrator, OrchestratorSettings, TriggerReport};
pub use processor::BatchProcessor;
pub use queue::{MemoryQueue, PgQueue, QueueBackend, QueueError};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::ImportScheduler;
pub use store::{JobStore, MemoryStore, PgStore, RunStore, StoreError};
pub use types::{Batch, BatchResult, FailureEntry, ImportRun, QueueSnapshot, RunStatus};
pub use upserter::RecordUpserter;
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
