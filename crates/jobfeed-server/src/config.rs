//! Server configuration
//!
//! Read from the environment (and a `.env` file when present). The import
//! pipeline has its own settings in [`crate::import::config`].
//!
//! | Variable                  | Default                 |
//! |---------------------------|-------------------------|
//! | `JOBFEED_HOST`            | `127.0.0.1`             |
//! | `JOBFEED_PORT`            | `8080`                  |
//! | `JOBFEED_SHUTDOWN_TIMEOUT`| `30` (seconds)          |
//! | `CORS_ALLOWED_ORIGINS`    | `http://localhost:3000` |
//! | `CORS_ALLOW_CREDENTIALS`  | `false`                 |
//! | `DATABASE_*`              | see [`DbConfig`]        |

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::DbConfig;

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Origin of the local dashboard
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Parsed value of `key`, or `default` when unset or unparsable
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list in `key`; `None` when unset or blank
pub(crate) fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    (!items.is_empty()).then_some(items)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DbConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on waiting for workers to drain after a shutdown signal
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Empty or `*` allows any origin
    pub allowed_origins: Vec<String>,
    /// Ignored for a wildcard origin
    pub allow_credentials: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            server: ServerConfig {
                host: env_or("JOBFEED_HOST", defaults.server.host),
                port: env_or("JOBFEED_PORT", defaults.server.port),
                shutdown_timeout_secs: env_or(
                    "JOBFEED_SHUTDOWN_TIMEOUT",
                    defaults.server.shutdown_timeout_secs,
                ),
            },
            database: DbConfig::from_env(),
            cors: CorsConfig {
                allowed_origins: env_list("CORS_ALLOWED_ORIGINS")
                    .unwrap_or(defaults.cors.allowed_origins),
                allow_credentials: env_or(
                    "CORS_ALLOW_CREDENTIALS",
                    defaults.cors.allow_credentials,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("JOBFEED_HOST must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("JOBFEED_PORT must be greater than 0");
        }

        self.database.validate()?;

        if self.cors.allow_credentials && self.cors.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("CORS credentials are disabled for a wildcard origin");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DbConfig::default(),
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: false,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_pool_bounds() {
        let mut config = Config::default();
        config.database.min_connections = config.database.max_connections + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_list_skips_blanks() {
        std::env::set_var("JOBFEED_TEST_LIST", " a , ,b,");
        assert_eq!(
            env_list("JOBFEED_TEST_LIST"),
            Some(vec!["a".to_string(), "b".to_string()])
        );

        std::env::set_var("JOBFEED_TEST_LIST", " , ");
        assert_eq!(env_list("JOBFEED_TEST_LIST"), None);

        std::env::remove_var("JOBFEED_TEST_LIST");
        assert_eq!(env_list("JOBFEED_TEST_LIST"), None);
    }

    #[test]
    #[serial]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("JOBFEED_TEST_NUMBER", "eleven");
        assert_eq!(env_or("JOBFEED_TEST_NUMBER", 7u32), 7);

        std::env::set_var("JOBFEED_TEST_NUMBER", " 11 ");
        assert_eq!(env_or("JOBFEED_TEST_NUMBER", 7u32), 11);

        std::env::remove_var("JOBFEED_TEST_NUMBER");
    }

    #[test]
    #[serial]
    fn test_load_reads_port_and_origins() {
        std::env::set_var("JOBFEED_PORT", "9090");
        std::env::set_var("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example");

        let config = Config::load().unwrap();

        std::env::remove_var("JOBFEED_PORT");
        std::env::remove_var("CORS_ALLOWED_ORIGINS");

        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
