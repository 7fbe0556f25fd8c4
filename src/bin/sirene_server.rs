//! Sirene Gateway REST server
//!
//! ## Usage
//!
//! ```bash
//! SIRENE_CONSUMER_SECRET=... \
//! DATABASE_URL=postgresql://localhost/icpe \
//!   cargo run --bin sirene_server
//!
//! curl http://localhost:3000/siret/12345678900012
//! curl 'http://localhost:3000/search?clue=acme&department=38'
//! curl http://localhost:3000/ping
//! ```
//!
//! Startup order: configuration, initial token (fatal on failure), daily
//! renewal task, enrichment store (bounded wait, never fatal), listener.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sirene_gateway::api::create_router;
use sirene_gateway::config::Args;
use sirene_gateway::icpe::{EnrichmentStore, PgFacilityRepository};
use sirene_gateway::sirene::{
    spawn_renewal_task, HttpCredentialExchange, RegistryClient, TokenCache, TokenFile,
};
use sirene_gateway::{Aggregator, StartupError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "sirene_gateway={level},sirene_server={level},tower_http={level}",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sirene gateway");
    tracing::debug!(config = ?args, "Loaded configuration");

    args.validate().map_err(StartupError::from)?;

    let http = reqwest::Client::builder()
        .timeout(args.registry_timeout())
        .build()
        .map_err(StartupError::HttpClient)?;

    // Token lifecycle
    let exchange = HttpCredentialExchange::new(
        http.clone(),
        args.sirene_token_url.clone(),
        args.consumer_secret().map_err(StartupError::from)?,
    );
    let mut cache = TokenCache::new(Arc::new(exchange), args.token_validity());
    if let Some(path) = &args.token_file {
        cache = cache.with_token_file(TokenFile::new(path.clone()));
    }
    let tokens = Arc::new(cache);

    let token = tokens
        .current()
        .await
        .map_err(StartupError::from)
        .context("Cannot start without a registry access token")?;
    tracing::info!(expires_at = %token.expires_at(), "Registry access token acquired");

    let renewal = spawn_renewal_task(tokens.clone(), args.token_renewal_at);

    // Enrichment store
    let store_config = args.store_config().map_err(StartupError::from)?;
    let repository =
        PgFacilityRepository::connect_lazy(&store_config).map_err(StartupError::Database)?;
    let store = EnrichmentStore::start(Arc::new(repository), args.store_startup_policy()).await;
    tracing::info!(state = ?store.state(), "Enrichment store initialised");

    let registry = RegistryClient::new(http, &args.sirene_api_url, tokens)
        .with_page_size(args.search_page_size);
    let aggregator = Aggregator::new(Arc::new(registry), Arc::new(store))
        .with_default_timeout(args.request_timeout())
        .with_enrichment_concurrency(args.database_pool_size as usize);

    let app = create_router(Arc::new(aggregator));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", args.listen))?;
    tracing::info!("Server listening on http://{}", args.listen);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    renewal.abort();
    served.context("Server error")?;

    tracing::info!("Sirene gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
