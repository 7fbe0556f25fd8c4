//! Read access to the ICPE facility tables
//!
//! `FacilityRepository` is the seam between the enrichment store and its
//! backing database. The Postgres implementation reads two tables:
//!
//! - `installations`: one row per facility, keyed by `code_s3ic`, carrying
//!   the SIRET under which it was registered (`s3ic_numero_siret`) and the
//!   SIRET of its emissions filing (`irep_numero_siret`);
//! - `rubriques`: the facility's classification lines, keyed by `code_s3ic`.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{FacilityRow, RegulatoryLine};

/// Failure talking to the enrichment store.
///
/// Never leaves the `icpe` module as an error: `EnrichmentStore` turns it
/// into a "not found" lookup.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("enrichment store unreachable: {0}")]
    Unavailable(String),

    #[error("enrichment query failed: {0}")]
    Query(String),
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[async_trait]
pub trait FacilityRepository: Send + Sync {
    /// Cheap round-trip used by the startup liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Facility registered under `siret`, matched against either identifier
    /// column.
    async fn find_facility(&self, siret: &str) -> Result<Option<FacilityRow>, StoreError>;

    /// Lines of `facility_code` that are currently operating, in the store's
    /// natural order.
    async fn operating_lines(&self, facility_code: &str)
        -> Result<Vec<RegulatoryLine>, StoreError>;
}

#[cfg(feature = "database")]
pub use postgres::{PgFacilityRepository, StoreConfig};

#[cfg(feature = "database")]
mod postgres {
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlx::{postgres::PgPoolOptions, PgPool};
    use tracing::info;

    use super::{FacilityRepository, StoreError};
    use crate::icpe::types::{FacilityRow, RegulatoryLine, OPERATING_STATUS};

    /// Connection settings for the ICPE database
    #[derive(Clone)]
    pub struct StoreConfig {
        pub database_url: String,
        pub max_connections: u32,
        /// Upper bound on waiting for a pooled connection. Kept short so a
        /// dead store costs a request little even after startup.
        pub acquire_timeout: Duration,
    }

    impl std::fmt::Debug for StoreConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("StoreConfig")
                .field("database_url", &mask_database_url(&self.database_url))
                .field("max_connections", &self.max_connections)
                .field("acquire_timeout", &self.acquire_timeout)
                .finish()
        }
    }

    pub struct PgFacilityRepository {
        pool: PgPool,
    }

    impl PgFacilityRepository {
        /// Build the pool without connecting; the startup probe establishes
        /// the first connection.
        pub fn connect_lazy(config: &StoreConfig) -> Result<Self, sqlx::Error> {
            info!(
                "Configuring enrichment store: {}",
                mask_database_url(&config.database_url)
            );

            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect_lazy(&config.database_url)?;

            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl FacilityRepository for PgFacilityRepository {
        async fn ping(&self) -> Result<(), StoreError> {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        }

        async fn find_facility(&self, siret: &str) -> Result<Option<FacilityRow>, StoreError> {
            let row = sqlx::query_as::<_, FacilityRow>(
                r#"
                SELECT code_s3ic AS facility_code, url_fiche AS reference_url
                FROM installations
                WHERE s3ic_numero_siret = $1 OR irep_numero_siret = $1
                LIMIT 1
                "#,
            )
            .bind(siret)
            .fetch_optional(&self.pool)
            .await?;

            Ok(row)
        }

        async fn operating_lines(
            &self,
            facility_code: &str,
        ) -> Result<Vec<RegulatoryLine>, StoreError> {
            let lines = sqlx::query_as::<_, RegulatoryLine>(
                r#"
                SELECT rubrique AS category_code,
                       regime_autorise AS authorization_regime,
                       etat_activite AS operating_status
                FROM rubriques
                WHERE code_s3ic = $1 AND etat_activite = $2
                "#,
            )
            .bind(facility_code)
            .bind(OPERATING_STATUS)
            .fetch_all(&self.pool)
            .await?;

            Ok(lines)
        }
    }

    /// Mask the password of a database URL for logging
    pub(crate) fn mask_database_url(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "***".to_string(),
        }
    }

}
