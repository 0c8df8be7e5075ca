//! Jobfeed Common Library
//!
//! Shared types, logging setup, and error handling for the jobfeed workspace.
//!
//! - **Error Handling**: [`JobfeedError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//! - **Types**: the normalized [`types::JobPosting`] every source adapter produces
//!
//! # Example
//!
//! ```no_run
//! use jobfeed_common::types::JobPosting;
//!
//! fn check(posting: &JobPosting) -> jobfeed_common::Result<()> {
//!     posting.validate()?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{JobfeedError, Result};
pub use types::JobPosting;
