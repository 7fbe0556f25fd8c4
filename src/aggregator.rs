//! Registry + enrichment aggregation
//!
//! Joins a registry establishment with its ICPE record into the single
//! response type returned by the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LookupError;
use crate::icpe::{EnrichmentRecord, EnrichmentStore, RegulatoryLine};
use crate::sirene::{RegistryClient, RegistryRecord, SearchQuery, Siret};

/// Registry record merged with its enrichment.
///
/// Enrichment fields are always present; they are empty when the
/// establishment is not a known facility or the store is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    #[serde(flatten)]
    pub registry: RegistryRecord,
    pub facility_code: String,
    pub reference_url: String,
    pub regulatory_lines: Vec<RegulatoryLine>,
}

impl UnifiedResponse {
    pub fn merge(registry: RegistryRecord, enrichment: Option<EnrichmentRecord>) -> Self {
        let enrichment = enrichment.unwrap_or_default();
        Self {
            registry,
            facility_code: enrichment.facility_code,
            reference_url: enrichment.reference_url,
            regulatory_lines: enrichment.regulatory_lines,
        }
    }

    pub fn is_enriched(&self) -> bool {
        !self.facility_code.is_empty()
    }
}

const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 5;

pub struct Aggregator {
    registry: Arc<RegistryClient>,
    store: Arc<EnrichmentStore>,
    default_timeout: Option<Duration>,
    enrichment_concurrency: usize,
}

impl Aggregator {
    pub fn new(registry: Arc<RegistryClient>, store: Arc<EnrichmentStore>) -> Self {
        Self {
            registry,
            store,
            default_timeout: None,
            enrichment_concurrency: DEFAULT_ENRICHMENT_CONCURRENCY,
        }
    }

    /// Upper bound on enrichment lookups a single search runs at once.
    /// Matches the store's connection pool size in production.
    pub fn with_enrichment_concurrency(mut self, limit: usize) -> Self {
        self.enrichment_concurrency = limit.max(1);
        self
    }

    /// Deadline applied to requests that do not carry their own.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<EnrichmentStore> {
        &self.store
    }

    /// Look up one establishment and attach its enrichment.
    ///
    /// Both lookups run concurrently. `timeout` (or the default deadline)
    /// bounds the whole operation; on expiry both are cancelled.
    pub async fn resolve(
        &self,
        siret: &Siret,
        timeout: Option<Duration>,
    ) -> Result<UnifiedResponse, LookupError> {
        self.with_deadline(timeout, async {
            let (registry, enrichment) = tokio::join!(
                self.registry.get_etablissement(siret),
                self.store.lookup(siret)
            );
            let response = UnifiedResponse::merge(registry?, enrichment);
            debug!(siret = %siret, enriched = response.is_enriched(), "Resolved establishment");
            Ok(response)
        })
        .await
    }

    /// Search the registry and enrich every result, keeping registry order.
    ///
    /// At most `enrichment_concurrency` enrichment lookups are in flight.
    pub async fn search(
        &self,
        query: &SearchQuery,
        timeout: Option<Duration>,
    ) -> Result<Vec<UnifiedResponse>, LookupError> {
        self.with_deadline(timeout, async {
            let records = self.registry.search(query).await?;
            let lookups: Vec<_> = records
                .iter()
                .map(|record| async move {
                    match Siret::parse(&record.siret) {
                        Ok(siret) => self.store.lookup(&siret).await,
                        Err(_) => None,
                    }
                })
                .collect();
            let enrichments: Vec<Option<EnrichmentRecord>> =
                stream::iter(lookups)
                .buffered(self.enrichment_concurrency)
                .collect()
                .await;

            let results: Vec<UnifiedResponse> = records
                .into_iter()
                .zip(enrichments)
                .map(|(record, enrichment)| UnifiedResponse::merge(record, enrichment))
                .collect();
            debug!(count = results.len(), "Search resolved");
            Ok(results)
        })
        .await
    }

    async fn with_deadline<T, F>(
        &self,
        timeout: Option<Duration>,
        operation: F,
    ) -> Result<T, LookupError>
    where
        F: std::future::Future<Output = Result<T, LookupError>>,
    {
        match timeout.or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| LookupError::Timeout(limit))?,
            None => operation.await,
        }
    }
}
