//! ICPE (classified environmental facilities) enrichment
//!
//! Establishments registered as ICPE facilities get their currently
//! operating classification lines attached to registry lookups. The data
//! lives in a separate relational store that may be slow to come up or
//! unavailable; enrichment degrades to "not found" instead of failing the
//! lookup.

pub mod memory;
pub mod repository;
pub mod store;
pub mod types;

pub use memory::InMemoryFacilityRepository;
#[cfg(feature = "database")]
pub use repository::{PgFacilityRepository, StoreConfig};
pub use repository::{FacilityRepository, StoreError};
pub use store::{EnrichmentStore, StartupPolicy, StoreState};
pub use types::{EnrichmentRecord, FacilityRow, RegulatoryLine, OPERATING_STATUS};
