//! RSS 2.0 feed normalization
//!
//! Job boards publish plain RSS with a handful of vendor elements. Items are
//! mapped onto [`JobPosting`] with fixed defaults:
//!
//! | Field         | Source element(s)                 | Default        |
//! |---------------|-----------------------------------|----------------|
//! | `external_id` | `guid`, then `link`               | item rejected  |
//! | `title`       | `title`                           | item rejected  |
//! | `company`     | `company`                         | "Unknown"      |
//! | `location`    | `jobLocation`, then `location`    | "Remote"       |
//! | `description` | `description`, `content:encoded`  | none           |
//! | `job_type`    | `jobType`                         | "Full-time"    |
//! | `category`    | every `category`, comma-joined    | "General"      |
//! | `posted_date` | `pubDate` (RFC 2822 or RFC 3339)  | fetch time     |

use chrono::{DateTime, Utc};
use jobfeed_common::types::{
    JobPosting, DEFAULT_CATEGORY, DEFAULT_COMPANY, DEFAULT_JOB_TYPE, DEFAULT_LOCATION,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceFetchError;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
    company: Option<String>,
    #[serde(rename = "jobLocation")]
    job_location: Option<String>,
    location: Option<String>,
    #[serde(rename = "jobType")]
    job_type: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// `<guid isPermaLink="false">...</guid>`; attributes are ignored
#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Parse an RSS document into postings, using the current time for items
/// without a usable `pubDate`.
pub fn parse_feed(xml: &str, source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError> {
    parse_feed_at(xml, source_url, Utc::now())
}

/// Same as [`parse_feed`] with an explicit fetch time
pub fn parse_feed_at(
    xml: &str,
    source_url: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<JobPosting>, SourceFetchError> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| SourceFetchError::Parse {
        url: source_url.to_string(),
        message: e.to_string(),
    })?;

    rss.channel
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            normalize_item(item, source_url, fetched_at).map_err(|reason| {
                SourceFetchError::Normalize {
                    url: source_url.to_string(),
                    index,
                    reason,
                }
            })
        })
        .collect()
}

fn normalize_item(
    item: Item,
    source_url: &str,
    fetched_at: DateTime<Utc>,
) -> Result<JobPosting, String> {
    let link = non_blank(item.link);

    let external_id = non_blank(item.guid.map(|g| g.value))
        .or_else(|| link.clone())
        .ok_or_else(|| "missing guid and link".to_string())?;

    // Present-but-blank titles pass through; record validation rejects them
    // individually so the rest of the feed still imports.
    let title = item
        .title
        .map(|t| t.trim().to_string())
        .ok_or_else(|| format!("missing title (external id {})", external_id))?;

    let categories: Vec<String> = item
        .categories
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let posted_date = match non_blank(item.pub_date) {
        Some(raw) => parse_date(&raw).unwrap_or_else(|| {
            debug!(external_id = %external_id, pub_date = %raw, "Unparseable pubDate, using fetch time");
            fetched_at
        }),
        None => fetched_at,
    };

    Ok(JobPosting {
        external_id,
        title,
        company: Some(non_blank(item.company).unwrap_or_else(|| DEFAULT_COMPANY.to_string())),
        location: Some(
            non_blank(item.job_location)
                .or_else(|| non_blank(item.location))
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        ),
        description: non_blank(item.description).or_else(|| non_blank(item.content_encoded)),
        job_type: Some(non_blank(item.job_type).unwrap_or_else(|| DEFAULT_JOB_TYPE.to_string())),
        category: Some(if categories.is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            categories.join(", ")
        }),
        url: link,
        posted_date: Some(posted_date),
        source_url: source_url.to_string(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
