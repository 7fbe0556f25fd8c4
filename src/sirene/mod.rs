//! Sirene (INSEE business registry) integration
//!
//! This module provides:
//! - API types for establishment payloads and the flattened `RegistryRecord`
//! - SIRET validation and search query building
//! - Token cache with single-flight renewal, plus the daily renewal task
//! - Client for authenticated lookups against the registry

pub mod client;
pub mod query;
pub mod renewal;
pub mod token;
pub mod types;

pub use client::RegistryClient;
pub use query::{Department, SearchQuery, Siret};
pub use renewal::{next_renewal, spawn_renewal_task, RenewalScheduler};
pub use token::{
    AccessToken, CredentialExchange, HttpCredentialExchange, IssuedToken, TokenCache, TokenFile,
};
pub use types::{Address, Coordinates, RegistryRecord};
