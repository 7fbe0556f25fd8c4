//! In-memory facility repository
//!
//! Test double for the enrichment store's backend. Counts calls and
//! concurrent queries so tests can check whether a lookup reached the
//! backend, and can simulate a slow or failing database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::repository::{FacilityRepository, StoreError};
use super::types::{FacilityRow, RegulatoryLine, OPERATING_STATUS};

#[derive(Default)]
pub struct InMemoryFacilityRepository {
    /// Identifier (either column) -> facility
    facilities: HashMap<String, FacilityRow>,
    /// Facility code -> every line, whatever its status
    lines: HashMap<String, Vec<RegulatoryLine>>,
    /// Pings fail until this many attempts have been made
    pings_before_ready: usize,
    unreachable: AtomicBool,
    fail_facility_query: AtomicBool,
    fail_line_query: AtomicBool,
    /// Added to every facility and line query
    latency: Duration,
    pings: AtomicUsize,
    queries: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Marks one query as running until dropped, including when the query
/// future is cancelled mid-flight.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(repository: &'a InMemoryFacilityRepository) -> Self {
        repository.queries.fetch_add(1, Ordering::SeqCst);
        let now = repository.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        repository.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            current: &repository.in_flight,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryFacilityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a facility under one or more identifiers.
    pub fn with_facility(
        mut self,
        identifiers: &[&str],
        facility_code: &str,
        reference_url: Option<&str>,
    ) -> Self {
        let row = FacilityRow {
            facility_code: facility_code.to_string(),
            reference_url: reference_url.map(str::to_string),
        };
        for id in identifiers {
            self.facilities.insert(id.to_string(), row.clone());
        }
        self
    }

    pub fn with_line(
        mut self,
        facility_code: &str,
        category_code: &str,
        authorization_regime: Option<&str>,
        operating_status: &str,
    ) -> Self {
        self.lines
            .entry(facility_code.to_string())
            .or_default()
            .push(RegulatoryLine {
                category_code: category_code.to_string(),
                authorization_regime: authorization_regime.map(str::to_string),
                operating_status: operating_status.to_string(),
            });
        self
    }

    /// Fail the first `attempts` pings, as a database still starting would.
    pub fn ready_after(mut self, attempts: usize) -> Self {
        self.pings_before_ready = attempts;
        self
    }

    /// Delay every facility and line query by `latency`. Pings stay fast.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_facility_query_failing(&self, failing: bool) {
        self.fail_facility_query.store(failing, Ordering::SeqCst);
    }

    pub fn set_line_query_failing(&self, failing: bool) {
        self.fail_line_query.store(failing, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Facility and line queries issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Queries currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of queries ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl FacilityRepository for InMemoryFacilityRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        let attempt = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable.load(Ordering::SeqCst) || attempt <= self.pings_before_ready {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn find_facility(&self, siret: &str) -> Result<Option<FacilityRow>, StoreError> {
        let _running = InFlight::enter(self);
        self.simulate_latency().await;
        if self.fail_facility_query.load(Ordering::SeqCst) {
            return Err(StoreError::Query("relation \"installations\" is locked".to_string()));
        }
        Ok(self.facilities.get(siret).cloned())
    }

    async fn operating_lines(
        &self,
        facility_code: &str,
    ) -> Result<Vec<RegulatoryLine>, StoreError> {
        let _running = InFlight::enter(self);
        self.simulate_latency().await;
        if self.fail_line_query.load(Ordering::SeqCst) {
            return Err(StoreError::Query("canceling statement due to statement timeout".to_string()));
        }
        Ok(self
            .lines
            .get(facility_code)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|l| l.operating_status == OPERATING_STATUS)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_queries_are_tracked() {
        let repository = Arc::new(
            InMemoryFacilityRepository::new()
                .with_facility(&["12345678900012"], "0061.01234", None)
                .with_latency(Duration::from_millis(50)),
        );

        let queries = (0..3).map(|_| {
            let repository = repository.clone();
            tokio::spawn(async move { repository.find_facility("12345678900012").await })
        });
        for outcome in futures::future::join_all(queries).await {
            assert!(outcome.unwrap().unwrap().is_some());
        }

        assert_eq!(repository.query_count(), 3);
        assert_eq!(repository.max_in_flight(), 3);
        assert_eq!(repository.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_query_leaves_flight() {
        let repository = InMemoryFacilityRepository::new().with_latency(Duration::from_secs(2));

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            repository.operating_lines("0061.01234"),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(repository.query_count(), 1);
        assert_eq!(repository.in_flight(), 0);
    }
}
