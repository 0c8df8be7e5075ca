//! jobfeed-fetch: fetch and normalize feeds without touching the store

use anyhow::{Context, Result};
use clap::Parser;
use jobfeed_common::logging::{init_logging, LogConfig, LogLevel};
use jobfeed_sources::{default_sources, HttpFeedAdapter, HttpFeedConfig, SourceAdapter};
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "jobfeed-fetch")]
#[command(author, version, about = "Fetch job feeds and print the normalized postings")]
struct Cli {
    /// Feed URLs (defaults to the built-in feed list)
    urls: Vec<String>,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Print every posting as a JSON line instead of a summary
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?.with_file_prefix("jobfeed-fetch");
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    let adapter = HttpFeedAdapter::new(HttpFeedConfig {
        timeout: Duration::from_secs(cli.timeout),
        ..HttpFeedConfig::default()
    })
    .context("Failed to build HTTP client")?;

    let urls = if cli.urls.is_empty() {
        default_sources()
    } else {
        cli.urls
    };

    let mut failed = 0;
    for url in &urls {
        match adapter.fetch(url).await {
            Ok(postings) => {
                if cli.json {
                    for posting in &postings {
                        println!("{}", serde_json::to_string(posting)?);
                    }
                } else {
                    println!("{:>5}  {}", postings.len(), url);
                }
            },
            Err(e) => {
                error!(url = %url, error = %e, "Feed failed");
                failed += 1;
            },
        }
    }

    info!(feeds = urls.len(), failed, "Done");

    if failed == urls.len() {
        anyhow::bail!("all {} feeds failed", failed);
    }

    Ok(())
}
