//! Access token lifecycle for the Sirene API
//!
//! The registry only accepts short-lived bearer tokens obtained through a
//! client-credentials grant. `TokenCache` owns the current token and makes
//! sure concurrent callers share a single credential exchange:
//!
//! - reading a cached token never waits on anything but a short read lock;
//! - the first caller needing a renewal runs the exchange, every caller that
//!   arrives while it is in flight (request tasks hitting a 401, the daily
//!   scheduler) waits for that exchange and receives its outcome;
//! - a failed renewal leaves the previous token in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TokenError;

/// A bearer token and the window during which it is expected to be valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    obtained_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, obtained_at: DateTime<Utc>, validity: Duration) -> Self {
        let validity =
            chrono::Duration::from_std(validity).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let expires_at = obtained_at
            .checked_add_signed(validity)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            value: value.into(),
            obtained_at,
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    /// Lifetime in seconds, when the endpoint reports one.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl IssuedToken {
    fn into_access_token(self, default_validity: Duration) -> AccessToken {
        let validity = self
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(default_validity);
        AccessToken::new(self.access_token, Utc::now(), validity)
    }
}

/// Source of fresh tokens.
///
/// Implementations must be Send + Sync; the cache calls `exchange` from
/// whichever task wins the renewal.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self) -> Result<IssuedToken, TokenError>;
}

/// Client-credentials grant against the registry's token endpoint.
pub struct HttpCredentialExchange {
    http: reqwest::Client,
    token_url: Url,
    secret: String,
}

impl HttpCredentialExchange {
    /// `secret` is the pre-shared consumer secret, already in the form the
    /// endpoint expects after `Basic `.
    pub fn new(http: reqwest::Client, token_url: Url, secret: impl Into<String>) -> Self {
        Self {
            http,
            token_url,
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for HttpCredentialExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentialExchange")
            .field("token_url", &self.token_url.as_str())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn exchange(&self) -> Result<IssuedToken, TokenError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let issued: IssuedToken =
            serde_json::from_str(&body).map_err(|e| TokenError::Parse(e.to_string()))?;
        if issued.access_token.is_empty() {
            return Err(TokenError::Parse("empty access_token".to_string()));
        }

        Ok(issued)
    }
}

/// On-disk `{"access_token": "..."}` hand-off read by sibling processes.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct TokenFileContents {
    access_token: String,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file atomically: readers see the old or the new token,
    /// never a truncated file.
    pub async fn write(&self, token: &AccessToken) -> std::io::Result<()> {
        let body = serde_json::to_vec(&TokenFileContents {
            access_token: token.value().to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    pub async fn read(&self) -> std::io::Result<String> {
        let body = tokio::fs::read(&self.path).await?;
        let contents: TokenFileContents = serde_json::from_slice(&body)?;
        Ok(contents.access_token)
    }
}

/// Why a renewal was requested.
enum Trigger<'a> {
    /// Nothing cached yet.
    Empty,
    /// The registry rejected this token value.
    Stale(&'a str),
    /// Unconditional renewal.
    Forced,
}

/// Shared owner of the registry access token.
pub struct TokenCache {
    source: Arc<dyn CredentialExchange>,
    default_validity: Duration,
    cached: RwLock<Option<AccessToken>>,
    /// Number of finished exchanges. Only written while `renewal` is held.
    completed: AtomicU64,
    /// Held for the whole duration of an exchange; keeps the last outcome so
    /// callers that queued behind it can reuse it.
    renewal: Mutex<Option<Result<AccessToken, TokenError>>>,
    token_file: Option<TokenFile>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn CredentialExchange>, default_validity: Duration) -> Self {
        Self {
            source,
            default_validity,
            cached: RwLock::new(None),
            completed: AtomicU64::new(0),
            renewal: Mutex::new(None),
            token_file: None,
        }
    }

    /// Also publish every fresh token to `file`.
    pub fn with_token_file(mut self, file: TokenFile) -> Self {
        self.token_file = Some(file);
        self
    }

    /// The cached token, if any. Never performs I/O.
    pub fn cached(&self) -> Option<AccessToken> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of credential exchanges that have completed, successful or not.
    pub fn exchange_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// The current token. Only the very first call (empty cache) reaches the
    /// token endpoint; a present token is returned even past its window,
    /// renewal is the scheduler's and the 401 path's job.
    pub async fn current(&self) -> Result<AccessToken, TokenError> {
        if let Some(token) = self.cached() {
            if token.is_expired(Utc::now()) {
                warn!(
                    expires_at = %token.expires_at(),
                    "Serving access token past its validity window"
                );
            }
            return Ok(token);
        }
        self.renew(Trigger::Empty).await
    }

    /// Fetch a fresh token regardless of the cached one. Joins an exchange
    /// already in flight instead of starting a second one.
    pub async fn force_renew(&self) -> Result<AccessToken, TokenError> {
        self.renew(Trigger::Forced).await
    }

    /// Renew after the registry rejected `stale`. If the cache already holds
    /// a different token, that one is returned without an exchange.
    pub async fn renew_stale(&self, stale: &AccessToken) -> Result<AccessToken, TokenError> {
        if let Some(token) = self.cached() {
            if token.value() != stale.value() {
                return Ok(token);
            }
        }
        self.renew(Trigger::Stale(stale.value())).await
    }

    async fn renew(&self, trigger: Trigger<'_>) -> Result<AccessToken, TokenError> {
        let observed = self.completed.load(Ordering::Acquire);
        let mut last_outcome = self.renewal.lock().await;

        if self.completed.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last_outcome.as_ref() {
                debug!("Reusing outcome of concurrent token renewal");
                return outcome.clone();
            }
        }

        match trigger {
            Trigger::Empty => {
                if let Some(token) = self.cached() {
                    return Ok(token);
                }
            }
            Trigger::Stale(value) => {
                if let Some(token) = self.cached().filter(|t| t.value() != value) {
                    return Ok(token);
                }
            }
            Trigger::Forced => {}
        }

        let outcome = self
            .source
            .exchange()
            .await
            .map(|issued| issued.into_access_token(self.default_validity));

        match &outcome {
            Ok(token) => {
                *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
                info!(expires_at = %token.expires_at(), "Access token renewed");
                if let Some(file) = &self.token_file {
                    if let Err(e) = file.write(token).await {
                        warn!(
                            path = %file.path().display(),
                            error = %e,
                            "Failed to write token hand-off file (non-fatal)"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Token renewal failed, keeping previous token");
            }
        }

        *last_outcome = Some(outcome.clone());
        self.completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("cached", &self.cached())
            .field("exchanges", &self.exchange_count())
            .field("token_file", &self.token_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Barrier;

    /// Exchange that counts calls and hands out `token-1`, `token-2`, ...
    struct CountingExchange {
        calls: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingExchange {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialExchange for CountingExchange {
        async fn exchange(&self) -> Result<IssuedToken, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(TokenError::Rejected {
                    status: 401,
                    body: "invalid_client".to_string(),
                });
            }
            Ok(IssuedToken {
                access_token: format!("token-{}", n),
                expires_in: None,
            })
        }
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_current_acquires_once() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone(), DAY);

        assert!(cache.cached().is_none());
        let first = cache.current().await.unwrap();
        let second = cache.current().await.unwrap();

        assert_eq!(first.value(), "token-1");
        assert_eq!(first, second);
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_coalesces() {
        let exchange = CountingExchange::new(Duration::from_millis(50));
        let cache = Arc::new(TokenCache::new(exchange.clone(), DAY));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.current().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value(), "token-1");
        }
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_force_renew_single_exchange() {
        let exchange = CountingExchange::new(Duration::from_millis(100));
        let cache = Arc::new(TokenCache::new(exchange.clone(), DAY));
        cache.current().await.unwrap();

        let barrier = Arc::new(Barrier::new(10));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache.force_renew().await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value(), "token-2");
        }

        // One initial acquisition plus exactly one renewal.
        assert_eq!(exchange.calls(), 2);
        assert_eq!(cache.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_sequential_force_renew_always_exchanges() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone(), DAY);

        cache.force_renew().await.unwrap();
        let token = cache.force_renew().await.unwrap();

        assert_eq!(token.value(), "token-2");
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_previous_token() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone(), DAY);
        let original = cache.current().await.unwrap();

        exchange.fail.store(true, Ordering::SeqCst);
        let err = cache.force_renew().await.unwrap_err();
        assert!(matches!(err, TokenError::Rejected { status: 401, .. }));

        assert_eq!(cache.cached(), Some(original.clone()));
        assert_eq!(cache.current().await.unwrap(), original);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_failure() {
        let exchange = CountingExchange::new(Duration::from_millis(50));
        exchange.fail.store(true, Ordering::SeqCst);
        let cache = Arc::new(TokenCache::new(exchange.clone(), DAY));

        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache.current().await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_renew_stale_skips_exchange_when_already_replaced() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone(), DAY);

        let old = cache.current().await.unwrap();
        let fresh = cache.renew_stale(&old).await.unwrap();
        assert_eq!(fresh.value(), "token-2");

        // A late 401 from a request that still used the old token.
        let again = cache.renew_stale(&old).await.unwrap();
        assert_eq!(again, fresh);
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_expires_in_overrides_default_validity() {
        let issued = IssuedToken {
            access_token: "abc".to_string(),
            expires_in: Some(60),
        };
        let token = issued.into_access_token(DAY);
        assert_eq!(
            token.expires_at() - token.obtained_at(),
            chrono::Duration::seconds(60)
        );
        assert!(!token.is_expired(token.obtained_at()));
        assert!(token.is_expired(token.obtained_at() + chrono::Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_token_file_written_on_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.json"));
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange, DAY).with_token_file(file.clone());

        cache.current().await.unwrap();
        assert_eq!(file.read().await.unwrap(), "token-1");

        cache.force_renew().await.unwrap();
        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(raw, r#"{"access_token":"token-2"}"#);
    }

    #[test]
    fn test_debug_redacts_token_value() {
        let token = AccessToken::new("super-secret", Utc::now(), DAY);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
        assert_eq!(token.bearer(), "Bearer super-secret");
    }
}
