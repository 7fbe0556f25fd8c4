//! Sirene Gateway - SIRET lookup and search with ICPE enrichment
//!
//! Establishment lookups and free-text searches against the INSEE Sirene
//! registry, each result enriched with the classified-facility (ICPE) record
//! held in a local Postgres store when one exists.
//!
//! ## Call chain
//!
//! ```text
//! HTTP (api) -> Aggregator -+-> RegistryClient -> TokenCache -> token endpoint
//!                           |                 \-> Sirene API
//!                           \-> EnrichmentStore -> FacilityRepository (Postgres)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use sirene_gateway::sirene::{SearchQuery, Siret};
//!
//! let siret = Siret::parse("123 456 789 00012").unwrap();
//! assert_eq!(siret.siren(), "123456789");
//!
//! let query = SearchQuery::from_params(Some("acme"), Some("38")).unwrap();
//! assert_eq!(
//!     query.to_lucene(),
//!     r#"denominationUniteLegale:"acme" AND codePostalEtablissement:38*"#
//! );
//! ```

// Error taxonomy
pub mod error;

// Process configuration (clap + env)
pub mod config;

// Registry integration: tokens, client, queries
pub mod sirene;

// ICPE enrichment store
pub mod icpe;

pub mod aggregator;

// HTTP surface (when enabled)
#[cfg(feature = "server")]
pub mod api;

pub use aggregator::{Aggregator, UnifiedResponse};
pub use error::{ConfigError, LookupError, StartupError, TokenError, ValidationError};
