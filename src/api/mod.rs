//! REST API for the gateway
//!
//! Thin axum layer over the `Aggregator`: request validation, error mapping
//! and a panic barrier. No lookup logic lives here.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::aggregator::Aggregator;

pub use error::{panic_response, ApiError, ErrorBody, ErrorDetail};
pub use routes::{SearchParams, REQUEST_TIMEOUT_HEADER};

/// Create the gateway router with CORS, tracing and panic recovery.
pub fn create_router(aggregator: Arc<Aggregator>) -> Router {
    Router::new()
        .route("/siret/:id", get(routes::get_siret))
        .route("/search", get(routes::search))
        .route("/ping", get(routes::ping))
        .with_state(aggregator)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
