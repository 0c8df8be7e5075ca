//! HTTP feed adapter

use async_trait::async_trait;
use jobfeed_common::JobPosting;
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::SourceAdapter;
use crate::error::SourceFetchError;
use crate::rss;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Some job boards reject requests without a browser-like agent
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpFeedConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Fetches RSS feeds over HTTP and normalizes them
#[derive(Debug, Clone)]
pub struct HttpFeedAdapter {
    client: reqwest::Client,
}

impl HttpFeedAdapter {
    pub fn new(config: HttpFeedConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SourceAdapter for HttpFeedAdapter {
    async fn fetch(&self, source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError> {
        debug!(url = %source_url, "Fetching feed");

        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|error| SourceFetchError::Request {
                url: source_url.to_string(),
                error,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status {
                url: source_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| SourceFetchError::Request {
                url: source_url.to_string(),
                error,
            })?;

        let postings = rss::parse_feed(&body, source_url)?;

        info!(url = %source_url, bytes = body.len(), records = postings.len(), "Fetched feed");

        Ok(postings)
    }
}
