//! Jobfeed source adapters
//!
//! A source adapter turns one feed locator into a list of normalized
//! [`JobPosting`](jobfeed_common::JobPosting)s. Each fetch fails on its own:
//! a broken feed yields a [`SourceFetchError`] for that feed only.
//!
//! - [`rss`]: RSS 2.0 parsing and normalization
//! - [`http`]: the reqwest-backed adapter used in production

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod adapter;
pub mod error;
pub mod http;
pub mod rss;

pub use adapter::SourceAdapter;
pub use error::SourceFetchError;
pub use http::{HttpFeedAdapter, HttpFeedConfig};

/// Feeds polled when no source list is configured
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://jobicy.com/?feed=job_feed",
    "https://jobicy.com/?feed=job_feed&job_categories=smm&job_types=full-time",
    "https://jobicy.com/?feed=job_feed&job_categories=seller&job_types=full-time&search_region=france",
    "https://jobicy.com/?feed=job_feed&job_categories=design-multimedia",
    "https://jobicy.com/?feed=job_feed&job_categories=data-science",
    "https://jobicy.com/?feed=job_feed&job_categories=copywriting",
    "https://jobicy.com/?feed=job_feed&job_categories=business",
    "https://jobicy.com/?feed=job_feed&job_categories=management",
    "https://www.higheredjobs.com/rss/articleFeed.cfm",
];

/// Owned copy of [`DEFAULT_SOURCES`]
pub fn default_sources() -> Vec<String> {
    DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()
}
