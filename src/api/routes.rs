//! Gateway endpoints
//!
//! ## Endpoints
//!
//! - `GET /siret/:id` - one establishment, enriched
//! - `GET /search?clue=&department=` - free-text search, each result enriched
//! - `GET /ping` - liveness
//!
//! Any request may carry `x-request-timeout-ms` to override the default
//! deadline for that request.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use crate::aggregator::{Aggregator, UnifiedResponse};
use crate::error::ValidationError;
use crate::sirene::{SearchQuery, Siret};

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Query params for `/search`
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Company name or fragment (required)
    pub clue: Option<String>,

    /// 2-character department code or 5-digit postal code
    pub department: Option<String>,
}

/// GET /siret/:id
///
/// The identifier is validated before anything is sent upstream.
pub async fn get_siret(
    State(aggregator): State<Arc<Aggregator>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UnifiedResponse>, ApiError> {
    let siret = Siret::parse(&id)?;
    let timeout = request_timeout(&headers)?;

    let response = aggregator.resolve(&siret, timeout).await?;
    Ok(Json(response))
}

/// GET /search
pub async fn search(
    State(aggregator): State<Arc<Aggregator>>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<UnifiedResponse>>, ApiError> {
    let query = SearchQuery::from_params(params.clue.as_deref(), params.department.as_deref())?;
    let timeout = request_timeout(&headers)?;

    let results = aggregator.search(&query, timeout).await?;
    Ok(Json(results))
}

/// GET /ping
pub async fn ping() -> &'static str {
    "pong"
}

fn request_timeout(headers: &HeaderMap) -> Result<Option<Duration>, ValidationError> {
    let Some(raw) = headers.get(REQUEST_TIMEOUT_HEADER) else {
        return Ok(None);
    };

    let invalid = || ValidationError::InvalidTimeout {
        name: REQUEST_TIMEOUT_HEADER,
        value: String::from_utf8_lossy(raw.as_bytes()).into_owned(),
    };
    let millis: u64 = raw
        .to_str()
        .map_err(|_| invalid())?
        .trim()
        .parse()
        .map_err(|_| invalid())?;
    if millis == 0 {
        return Err(invalid());
    }

    Ok(Some(Duration::from_millis(millis)))
}
