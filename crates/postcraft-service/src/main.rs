//! Postcraft Service - HTTP API for credits, generation and payments
//!
//! This is the main entry point for the postcraft service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postcraft_generation::OpenAiCompatible;
use postcraft_service::{create_router, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,postcraft=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Postcraft Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        llm_api_base = %config.llm_api_base,
        llm_model = %config.llm_model,
        llm_configured = %config.llm_api_key.is_some(),
        stripe_configured = %config.stripe_webhook_secret.is_some(),
        starting_grant = config.starting_grant,
        "Service configuration loaded"
    );

    let model = OpenAiCompatible::new(config.openai())?;

    #[cfg(feature = "rocksdb-backend")]
    let store = {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        Arc::new(postcraft_store::RocksStore::open(&config.data_dir)?)
    };

    #[cfg(not(feature = "rocksdb-backend"))]
    let store = {
        tracing::warn!("Built without rocksdb-backend - using in-memory store, data will not persist");
        Arc::new(postcraft_store::MemoryStore::new())
    };

    // Build app state
    let state = AppState::new(store, Arc::new(model), config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
