//! Common types used across jobfeed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobfeedError, Result};

/// Default company when a feed item does not name one
pub const DEFAULT_COMPANY: &str = "Unknown";

/// Default location when a feed item does not name one
pub const DEFAULT_LOCATION: &str = "Remote";

/// Default employment type when a feed item does not name one
pub const DEFAULT_JOB_TYPE: &str = "Full-time";

/// Default category when a feed item does not name one
pub const DEFAULT_CATEGORY: &str = "General";

/// A job posting normalized from any feed.
///
/// `external_id` is the natural key: two postings with the same external id
/// describe the same job, regardless of which feed produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    /// Feed-provided identifier (guid, or link when no guid is present)
    pub external_id: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub category: Option<String>,
    /// Link to the posting on the publisher's site
    pub url: Option<String>,
    pub posted_date: Option<DateTime<Utc>>,
    /// Feed the posting was fetched from
    pub source_url: String,
}

impl JobPosting {
    /// Create a posting with only the required fields set
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            company: None,
            location: None,
            description: None,
            job_type: None,
            category: None,
            url: None,
            posted_date: None,
            source_url: source_url.into(),
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Check the fields the store requires.
    ///
    /// `external_id` and `title` must be non-blank; `url`, when present,
    /// must be an absolute URL.
    pub fn validate(&self) -> Result<()> {
        if self.external_id.trim().is_empty() {
            return Err(JobfeedError::invalid("external_id", "must not be empty"));
        }

        if self.title.trim().is_empty() {
            return Err(JobfeedError::invalid("title", "must not be empty"));
        }

        if let Some(ref link) = self.url {
            url::Url::parse(link)
                .map_err(|e| JobfeedError::invalid("url", format!("{} ({})", e, link)))?;
        }

        Ok(())
    }

    /// JSON payload recorded with failure entries
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
