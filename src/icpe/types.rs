//! ICPE enrichment records

use serde::{Deserialize, Serialize};

/// Operating-status value of regulatory lines that are currently in force.
pub const OPERATING_STATUS: &str = "En fonctionnement";

/// One environmental classification line of a facility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct RegulatoryLine {
    /// ICPE nomenclature heading ("2710", "3532", ...).
    pub category_code: String,
    /// Authorization regime (A, E, D, ...), when recorded.
    pub authorization_regime: Option<String>,
    pub operating_status: String,
}

/// Facility row resolved from an establishment identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct FacilityRow {
    pub facility_code: String,
    pub reference_url: Option<String>,
}

/// Regulatory data attached to an establishment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub facility_code: String,
    pub reference_url: String,
    /// Lines currently in operation, in the store's result order.
    pub regulatory_lines: Vec<RegulatoryLine>,
}
