//! Daily token renewal task.
//!
//! Renews the registry token once a day at a fixed UTC wall-clock time,
//! independent of request traffic, so an idle process never ends up holding
//! an expired token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::token::TokenCache;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Next occurrence of `at` strictly after `now`.
pub fn next_renewal(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Background renewal loop.
pub struct RenewalScheduler {
    cache: Arc<TokenCache>,
    at: NaiveTime,
    clock: Clock,
}

impl RenewalScheduler {
    pub fn new(cache: Arc<TokenCache>, at: NaiveTime) -> Self {
        Self {
            cache,
            at,
            clock: Arc::new(Utc::now),
        }
    }

    /// Read wall-clock time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run forever. Should be called inside a `tokio::spawn`.
    pub async fn run(self) {
        info!(at = %self.at, "Token renewal scheduler started (UTC)");

        loop {
            let now = (self.clock)();
            let next = next_renewal(now, self.at);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            // Joins a renewal already in flight (e.g. one started by a 401).
            match self.cache.force_renew().await {
                Ok(token) => info!(expires_at = %token.expires_at(), "Scheduled token renewal done"),
                Err(e) => warn!(error = %e, "Scheduled token renewal failed (non-fatal)"),
            }
        }
    }
}

/// Aborts the wrapped task when dropped, so cancelling the supervisor also
/// cancels the scheduler it is watching.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn the scheduler with automatic restart on panic.
///
/// The returned handle belongs to the supervisor; aborting it stops the
/// scheduler.
pub fn spawn_renewal_task(cache: Arc<TokenCache>, at: NaiveTime) -> JoinHandle<()> {
    supervise(move || RenewalScheduler::new(cache.clone(), at))
}

fn supervise<F>(make_scheduler: F) -> JoinHandle<()>
where
    F: Fn() -> RenewalScheduler + Send + 'static,
{
    tokio::spawn(async move {
        let mut restart_count = 0u32;

        loop {
            let mut scheduler = AbortOnDrop(tokio::spawn(make_scheduler().run()));
            match (&mut scheduler.0).await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    restart_count += 1;
                    error!(restart_count, "Token renewal scheduler panicked, restarting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(_) => break,
            }
        }
    })
}
