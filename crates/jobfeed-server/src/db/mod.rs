//! PostgreSQL connection pool

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::env_or;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/jobfeed";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime_secs: None,
        }
    }
}

impl DbConfig {
    /// `DATABASE_URL` plus the `DATABASE_*` pool settings.
    ///
    /// Idle timeout and max lifetime accept `0` to disable them.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: env_or("DATABASE_URL", defaults.url),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", defaults.min_connections),
            connect_timeout_secs: env_or("DATABASE_CONNECT_TIMEOUT", defaults.connect_timeout_secs),
            idle_timeout_secs: env_secs("DATABASE_IDLE_TIMEOUT", defaults.idle_timeout_secs),
            max_lifetime_secs: env_secs("DATABASE_MAX_LIFETIME", defaults.max_lifetime_secs),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL must not be empty");
        }
        if self.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.min_connections > self.max_connections {
            anyhow::bail!(
                "DATABASE_MIN_CONNECTIONS ({}) exceeds DATABASE_MAX_CONNECTIONS ({})",
                self.min_connections,
                self.max_connections
            );
        }
        Ok(())
    }
}

fn env_secs(key: &str, default: Option<u64>) -> Option<u64> {
    match std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok()) {
        Some(0) => None,
        Some(secs) => Some(secs),
        None => default,
    }
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
        .max_lifetime(config.max_lifetime_secs.map(Duration::from_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}

/// `SELECT 1`, for startup and health checks
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
