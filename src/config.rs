//! Configuration for the Sirene gateway
//!
//! CLI arguments with environment variable fallbacks (clap). The binary loads
//! a `.env` file first, so every setting can live there during development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use clap::Parser;
use url::Url;

use crate::error::ConfigError;
use crate::icpe::StartupPolicy;

/// SIRET lookup and search gateway over the Sirene registry API
#[derive(Parser, Clone)]
#[command(name = "sirene_server")]
#[command(about = "SIRET lookup and search over the Sirene API, enriched with ICPE data")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Base path of the Sirene API
    #[arg(
        long,
        env = "SIRENE_API_URL",
        default_value = "https://api.insee.fr/entreprises/sirene/V3.11"
    )]
    pub sirene_api_url: Url,

    /// Token endpoint for the client-credentials grant
    #[arg(long, env = "SIRENE_TOKEN_URL", default_value = "https://api.insee.fr/token")]
    pub sirene_token_url: Url,

    /// Pre-shared consumer secret sent as `Authorization: Basic <secret>` (required)
    #[arg(long, env = "SIRENE_CONSUMER_SECRET", hide_env_values = true)]
    pub sirene_consumer_secret: Option<String>,

    /// Validity window assumed for tokens whose response has no `expires_in`
    #[arg(long, env = "TOKEN_VALIDITY_SECS", default_value_t = 604_800)]
    pub token_validity_secs: u64,

    /// UTC wall-clock time (HH:MM) of the daily token renewal
    #[arg(long, env = "TOKEN_RENEWAL_AT", default_value = "00:00", value_parser = parse_wall_clock)]
    pub token_renewal_at: NaiveTime,

    /// Write every fresh token to this JSON file for sibling processes
    #[arg(long, env = "TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Timeout of a single registry HTTP call, in seconds
    #[arg(long, env = "REGISTRY_TIMEOUT_SECS", default_value_t = 10)]
    pub registry_timeout_secs: u64,

    /// Default deadline of an inbound request in milliseconds (0 disables)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 15_000)]
    pub request_timeout_ms: u64,

    /// Establishments requested per search
    #[arg(long, env = "SEARCH_PAGE_SIZE", default_value_t = 20)]
    pub search_page_size: u32,

    /// ICPE database connection string (required)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// ICPE database pool size
    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 5)]
    pub database_pool_size: u32,

    /// Bounded wait for the ICPE database at startup, in seconds
    #[arg(long, env = "STORE_STARTUP_TIMEOUT_SECS", default_value_t = 10)]
    pub store_startup_timeout_secs: u64,

    /// Interval between ICPE database liveness probes, in milliseconds
    #[arg(long, env = "STORE_PROBE_INTERVAL_MS", default_value_t = 500)]
    pub store_probe_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn parse_wall_clock(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| format!("expected HH:MM, got '{}': {}", value, e))
}

impl Args {
    /// Check required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consumer_secret()?;
        self.database_url()?;

        if !(1..=1000).contains(&self.search_page_size) {
            return Err(ConfigError::Invalid {
                name: "SEARCH_PAGE_SIZE",
                reason: format!("must be between 1 and 1000, got {}", self.search_page_size),
            });
        }
        if self.token_validity_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "TOKEN_VALIDITY_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.store_probe_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "STORE_PROBE_INTERVAL_MS",
                reason: "must be positive".to_string(),
            });
        }
        if self.database_pool_size == 0 {
            return Err(ConfigError::Invalid {
                name: "DATABASE_POOL_SIZE",
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn consumer_secret(&self) -> Result<&str, ConfigError> {
        self.sirene_consumer_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("SIRENE_CONSUMER_SECRET"))
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    /// `None` when request deadlines are disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn store_startup_policy(&self) -> StartupPolicy {
        StartupPolicy {
            probe_interval: Duration::from_millis(self.store_probe_interval_ms),
            timeout: Duration::from_secs(self.store_startup_timeout_secs),
        }
    }

    #[cfg(feature = "database")]
    pub fn store_config(&self) -> Result<crate::icpe::StoreConfig, ConfigError> {
        Ok(crate::icpe::StoreConfig {
            database_url: self.database_url()?.to_string(),
            max_connections: self.database_pool_size,
            acquire_timeout: Duration::from_secs(2),
        })
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("listen", &self.listen)
            .field("sirene_api_url", &self.sirene_api_url.as_str())
            .field("sirene_token_url", &self.sirene_token_url.as_str())
            .field(
                "sirene_consumer_secret",
                &self.sirene_consumer_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_validity_secs", &self.token_validity_secs)
            .field("token_renewal_at", &self.token_renewal_at)
            .field("token_file", &self.token_file)
            .field("registry_timeout_secs", &self.registry_timeout_secs)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("search_page_size", &self.search_page_size)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_pool_size", &self.database_pool_size)
            .field("store_startup_timeout_secs", &self.store_startup_timeout_secs)
            .field("store_probe_interval_ms", &self.store_probe_interval_ms)
            .field("log_level", &self.log_level)
            .finish()
    }
}
