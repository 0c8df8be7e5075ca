//! Scheduled import trigger
//!
//! Fires [`ImportOrchestrator::spawn_trigger`] at every cron fire time until
//! cancelled. A trigger that is still running when the next one fires is not
//! waited for.

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::orchestrator::ImportOrchestrator;

/// Parse a cron expression, accepting the usual 5-field form.
///
/// The `cron` crate wants a leading seconds field; 5-field expressions get
/// `0 ` prepended.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {trimmed}"))
    } else {
        Schedule::from_str(trimmed)
    }
}

pub struct ImportScheduler;

impl ImportScheduler {
    pub fn start(
        orchestrator: Arc<ImportOrchestrator>,
        schedule: Schedule,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Import scheduler started");

            loop {
                let Some(next_fire) = schedule.upcoming(Utc).next() else {
                    warn!("Cron schedule has no upcoming fire time, stopping scheduler");
                    break;
                };
                let wait = (next_fire - Utc::now()).to_std().unwrap_or_default();
                info!(next_fire = %next_fire, "Next scheduled import");

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {},
                }

                info!("Scheduled import firing");
                // Outcome is logged by the trigger task itself
                drop(orchestrator.spawn_trigger());
            }

            info!("Import scheduler stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::orchestrator::OrchestratorSettings;
    use crate::import::queue::MemoryQueue;
    use crate::import::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Timelike;
    use jobfeed_common::JobPosting;
    use jobfeed_sources::{SourceAdapter, SourceFetchError};
    use std::time::Duration;

    struct NoFeeds;

    #[async_trait]
    impl SourceAdapter for NoFeeds {
        async fn fetch(&self, _source_url: &str) -> Result<Vec<JobPosting>, SourceFetchError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_five_field_gets_seconds() {
        let schedule = parse_cron("0 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_six_field_passes_through() {
        let schedule = parse_cron("30 */5 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.second(), 30);
        assert_eq!(next.minute() % 5, 0);
    }

    #[test]
    fn test_invalid_expression() {
        assert!(parse_cron("every hour").is_err());
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[test]
    fn test_next_fire_is_in_the_future() {
        let schedule = parse_cron(" 0 0 * * * ").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.hour(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_scheduler() {
        let orchestrator = Arc::new(ImportOrchestrator::new(
            vec!["https://feed.example/rss".to_string()],
            Arc::new(NoFeeds),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::default()),
            OrchestratorSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = ImportScheduler::start(
            orchestrator,
            parse_cron("0 0 1 1 *").unwrap(),
            cancel.clone(),
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
