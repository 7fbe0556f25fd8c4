//! Sirene API Client
//!
//! Bearer-authenticated HTTP client for establishment lookups and searches.
//! Credentials come from the shared `TokenCache`; a 401 triggers one token
//! renewal and one retry, never more.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::query::{SearchQuery, Siret};
use super::token::{AccessToken, TokenCache};
use super::types::{EtablissementResponse, EtablissementsResponse, RegistryRecord};
use crate::error::LookupError;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_DIAGNOSTIC_BODY: usize = 500;

pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
    page_size: u32,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, base_url: &Url, tokens: Arc<TokenCache>) -> Self {
        Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            tokens,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Number of establishments requested per search.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Fetch one establishment by SIRET.
    pub async fn get_etablissement(&self, siret: &Siret) -> Result<RegistryRecord, LookupError> {
        let path = format!("/siret/{}", siret);
        let response: EtablissementResponse = self.lookup(&path, &[]).await?;
        if !response.etablissement.is_diffusible() {
            debug!(siret = %siret, "Establishment withheld from publication");
            return Err(LookupError::NonDiffusible {
                siret: siret.to_string(),
            });
        }
        Ok(response.etablissement.into())
    }

    /// Free-text search, in the registry's result order. Establishments
    /// withheld from publication are left out.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<RegistryRecord>, LookupError> {
        let params = [
            ("q", query.to_lucene()),
            ("nombre", self.page_size.to_string()),
        ];

        match self.lookup::<EtablissementsResponse>("/siret", &params).await {
            Ok(response) => Ok(response
                .etablissements
                .into_iter()
                .filter(|e| e.is_diffusible())
                .map(RegistryRecord::from)
                .collect()),
            // The registry answers 404 when a search matches nothing.
            Err(LookupError::Upstream { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Authenticated GET of `path` (relative to the base URL), decoded as `T`.
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LookupError> {
        let url = format!("{}{}", self.base_url, path);
        let endpoint = format!("GET {}", path);

        let token = self.tokens.current().await?;
        let mut response = self.send(&endpoint, &url, query, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(endpoint = %endpoint, "Registry rejected access token, renewing");
            let fresh = self.tokens.renew_stale(&token).await?;
            response = self.send(&endpoint, &url, query, &fresh).await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                warn!(endpoint = %endpoint, "Registry rejected renewed access token");
                return Err(LookupError::UpstreamAuth);
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = diagnostic_body(&endpoint, response.text().await);
            debug!(endpoint = %endpoint, status = status.as_u16(), "Registry returned an error");
            return Err(LookupError::Upstream {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| LookupError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        serde_json::from_str(&text).map_err(|e| LookupError::Decode {
            endpoint,
            message: format!(
                "{} (first 200 chars: {})",
                e,
                text.chars().take(200).collect::<String>()
            ),
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        url: &str,
        query: &[(&str, String)],
        token: &AccessToken,
    ) -> Result<reqwest::Response, LookupError> {
        self.http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| LookupError::Transport {
                endpoint: endpoint.to_string(),
                source: e,
            })
    }
}

/// Error body kept for diagnostics, truncated to 500 characters. A body that
/// could not be read is reported as such instead of as an empty body.
fn diagnostic_body(endpoint: &str, read: Result<String, reqwest::Error>) -> String {
    match read {
        Ok(body) => body.chars().take(MAX_DIAGNOSTIC_BODY).collect(),
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "Could not read registry error body");
            format!("<unreadable body: {}>", e)
        }
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_body_is_truncated() {
        let body = diagnostic_body("GET /siret", Ok("x".repeat(2_000)));
        assert_eq!(body.chars().count(), MAX_DIAGNOSTIC_BODY);
    }

    #[tokio::test]
    async fn test_unreadable_diagnostic_body_is_marked() {
        // Nothing listens on port 1: a cheap way to get a real reqwest::Error.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();

        let body = diagnostic_body("GET /siret", Err(err));
        assert!(body.starts_with("<unreadable body: "), "{}", body);
        assert!(!body.is_empty());
    }
}
