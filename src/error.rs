//! Error types for the Sirene gateway
//!
//! Registry lookups, token management and startup each get their own
//! `thiserror` enum. Enrichment failures have no public error type: the
//! enrichment store collapses them to "not found" before they reach a caller.

use std::time::Duration;

use thiserror::Error;

/// Rejected input, reported to the caller as a 400 with a readable detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("SIRET must contain exactly 14 digits, got {length} characters in '{value}'")]
    InvalidSiret { value: String, length: usize },

    #[error("missing required query parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("department must be a 2-character code or a 5-digit postal code, got '{0}'")]
    InvalidDepartment(String),

    #[error("header '{name}' must be a positive number of milliseconds, got '{value}'")]
    InvalidTimeout { name: &'static str, value: String },
}

/// Failure to obtain an access token from the token endpoint.
///
/// `Clone` because one renewal outcome is handed to every caller that
/// waited on the same in-flight exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token endpoint rejected the credential exchange ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error("token response could not be parsed: {0}")]
    Parse(String),
}

/// Errors surfaced by registry lookups and aggregation.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("registry rejected the access token after a forced renewal")]
    UpstreamAuth,

    #[error("establishment {siret} is not publicly disclosed")]
    NonDiffusible { siret: String },

    #[error("registry returned {status} for {endpoint}: {body}")]
    Upstream {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("registry request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode registry response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("access token unavailable: {0}")]
    Token(#[from] TokenError),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Invalid or missing process configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Faults that keep the process from accepting traffic.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("initial token acquisition failed: {0}")]
    Token(#[from] TokenError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[cfg(feature = "database")]
    #[error("invalid database connection settings: {0}")]
    Database(#[source] sqlx::Error),
}
