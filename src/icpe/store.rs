//! ICPE Enrichment Store
//!
//! Wraps a `FacilityRepository` with the connection lifecycle the gateway
//! needs at startup:
//!
//! ```text
//!   Connecting ──probe ok──▶ Ready
//!        │
//!        └──timeout / probe panic──▶ Failed   (for the rest of the process)
//! ```
//!
//! Lookups never fail. Anything short of a matched facility (store not
//! ready, query error, no row) is `None`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::repository::FacilityRepository;
use super::types::EnrichmentRecord;
use crate::sirene::Siret;

/// Connection state of the enrichment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Connecting,
    Ready,
    Failed,
}

impl StoreState {
    fn as_u8(self) -> u8 {
        match self {
            StoreState::Connecting => 0,
            StoreState::Ready => 1,
            StoreState::Failed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => StoreState::Connecting,
            1 => StoreState::Ready,
            _ => StoreState::Failed,
        }
    }
}

/// How long to wait for the store at startup, and how often to probe it.
#[derive(Debug, Clone, Copy)]
pub struct StartupPolicy {
    pub probe_interval: Duration,
    pub timeout: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct EnrichmentStore {
    repository: Arc<dyn FacilityRepository>,
    state: AtomicU8,
}

impl EnrichmentStore {
    /// A store in the `Connecting` state. Lookups return `None` until
    /// `wait_until_ready` has seen the store answer.
    pub fn new(repository: Arc<dyn FacilityRepository>) -> Self {
        Self {
            repository,
            state: AtomicU8::new(StoreState::Connecting.as_u8()),
        }
    }

    /// Build a store and block until it is ready or `policy.timeout` elapses.
    pub async fn start(repository: Arc<dyn FacilityRepository>, policy: StartupPolicy) -> Self {
        let store = Self::new(repository);
        store.wait_until_ready(policy).await;
        store
    }

    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == StoreState::Ready
    }

    /// Probe the store until it answers, for at most `policy.timeout`.
    ///
    /// The outcome is final: a store that missed the deadline stays `Failed`
    /// and is never queried by this instance.
    pub async fn wait_until_ready(&self, policy: StartupPolicy) -> StoreState {
        if self.state() != StoreState::Connecting {
            return self.state();
        }

        let started = Instant::now();
        let repository = self.repository.clone();
        let mut probe = tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match repository.ping().await {
                    Ok(()) => return attempts,
                    Err(e) => {
                        debug!(attempt = attempts, error = %e, "Enrichment store not ready yet");
                        tokio::time::sleep(policy.probe_interval).await;
                    }
                }
            }
        });

        let state = match tokio::time::timeout(policy.timeout, &mut probe).await {
            Ok(Ok(attempts)) => {
                info!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Enrichment store ready"
                );
                StoreState::Ready
            }
            Ok(Err(e)) => {
                error!(error = %e, "Enrichment store probe aborted, enrichment disabled");
                StoreState::Failed
            }
            Err(_) => {
                probe.abort();
                warn!(
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "Enrichment store not ready in time, enrichment disabled for this process"
                );
                StoreState::Failed
            }
        };

        self.state.store(state.as_u8(), Ordering::Release);
        state
    }

    /// Regulatory data for `siret`, if the store is ready and has a facility
    /// registered under it.
    ///
    /// A facility whose lines cannot be read is still returned, with no
    /// lines.
    pub async fn lookup(&self, siret: &Siret) -> Option<EnrichmentRecord> {
        if !self.is_ready() {
            return None;
        }

        let facility = match self.repository.find_facility(siret.as_str()).await {
            Ok(Some(facility)) => facility,
            Ok(None) => return None,
            Err(e) => {
                warn!(siret = %siret, error = %e, "Facility lookup failed, skipping enrichment");
                return None;
            }
        };

        let regulatory_lines = match self.repository.operating_lines(&facility.facility_code).await
        {
            Ok(lines) => lines,
            Err(e) => {
                warn!(
                    siret = %siret,
                    facility_code = %facility.facility_code,
                    error = %e,
                    "Regulatory lines lookup failed, returning facility without lines"
                );
                Vec::new()
            }
        };

        Some(EnrichmentRecord {
            facility_code: facility.facility_code,
            reference_url: facility.reference_url.unwrap_or_default(),
            regulatory_lines,
        })
    }
}

impl std::fmt::Debug for EnrichmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentStore")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icpe::memory::InMemoryFacilityRepository;
    use crate::icpe::types::{RegulatoryLine, OPERATING_STATUS};

    const SIRET: &str = "12345678900012";

    fn fast_policy(timeout_ms: u64) -> StartupPolicy {
        StartupPolicy {
            probe_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn siret() -> Siret {
        Siret::parse(SIRET).unwrap()
    }

    fn seeded() -> InMemoryFacilityRepository {
        InMemoryFacilityRepository::new()
            .with_facility(
                &[SIRET, "98765432100019"],
                "0061.01234",
                Some("https://www.georisques.gouv.fr/risques/installations/donnees/details/0061.01234"),
            )
            .with_line("0061.01234", "2791", Some("A"), OPERATING_STATUS)
            .with_line("0061.01234", "2710", Some("E"), "A l'arrêt")
            .with_line("0061.01234", "3532", Some("A"), OPERATING_STATUS)
    }

    #[tokio::test]
    async fn test_becomes_ready_after_retries() {
        let repository = Arc::new(seeded().ready_after(3));
        let store = EnrichmentStore::start(repository.clone(), fast_policy(2_000)).await;

        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(repository.ping_count(), 4);
    }

    #[tokio::test]
    async fn test_lookup_before_ready_is_not_found() {
        let repository = Arc::new(seeded());
        let store = EnrichmentStore::new(repository.clone());

        assert_eq!(store.state(), StoreState::Connecting);
        assert_eq!(store.lookup(&siret()).await, None);
        assert_eq!(repository.query_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_store_short_circuits_without_io() {
        let repository = Arc::new(seeded());
        repository.set_unreachable(true);

        let store = EnrichmentStore::start(repository.clone(), fast_policy(100)).await;
        assert_eq!(store.state(), StoreState::Failed);

        // Even once the database comes back, this instance stays disabled.
        repository.set_unreachable(false);
        let pings = repository.ping_count();

        let started = Instant::now();
        for _ in 0..50 {
            assert_eq!(store.lookup(&siret()).await, None);
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(repository.query_count(), 0);
        assert_eq!(repository.ping_count(), pings);
        assert_eq!(
            store.wait_until_ready(fast_policy(100)).await,
            StoreState::Failed
        );
    }

    #[tokio::test]
    async fn test_lookup_returns_operating_lines_in_order() {
        let store = EnrichmentStore::start(Arc::new(seeded()), fast_policy(1_000)).await;

        let record = store.lookup(&siret()).await.unwrap();
        assert_eq!(record.facility_code, "0061.01234");
        assert!(record.reference_url.ends_with("/0061.01234"));
        assert_eq!(
            record.regulatory_lines,
            vec![
                RegulatoryLine {
                    category_code: "2791".to_string(),
                    authorization_regime: Some("A".to_string()),
                    operating_status: OPERATING_STATUS.to_string(),
                },
                RegulatoryLine {
                    category_code: "3532".to_string(),
                    authorization_regime: Some("A".to_string()),
                    operating_status: OPERATING_STATUS.to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_matches_alternate_identifier() {
        let store = EnrichmentStore::start(Arc::new(seeded()), fast_policy(1_000)).await;
        let alternate = Siret::parse("98765432100019").unwrap();

        let record = store.lookup(&alternate).await.unwrap();
        assert_eq!(record.facility_code, "0061.01234");
    }

    #[tokio::test]
    async fn test_unknown_establishment_is_not_found() {
        let store = EnrichmentStore::start(Arc::new(seeded()), fast_policy(1_000)).await;
        let other = Siret::parse("11111111100011").unwrap();

        assert_eq!(store.lookup(&other).await, None);
    }

    #[tokio::test]
    async fn test_facility_query_failure_is_not_found() {
        let repository = Arc::new(seeded());
        let store = EnrichmentStore::start(repository.clone(), fast_policy(1_000)).await;
        repository.set_facility_query_failing(true);

        assert_eq!(store.lookup(&siret()).await, None);
    }

    #[tokio::test]
    async fn test_line_query_failure_keeps_facility() {
        let repository = Arc::new(seeded());
        let store = EnrichmentStore::start(repository.clone(), fast_policy(1_000)).await;
        repository.set_line_query_failing(true);

        let record = store.lookup(&siret()).await.unwrap();
        assert_eq!(record.facility_code, "0061.01234");
        assert!(record.regulatory_lines.is_empty());
    }
}
