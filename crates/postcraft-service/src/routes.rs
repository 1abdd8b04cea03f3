//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, artifacts, credits, generate, health, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (JWT auth)
/// - `POST /v1/accounts` - Open account (idempotent)
/// - `GET /v1/accounts/me` - Get current user's account
/// - `DELETE /v1/accounts/me` - Delete account and history
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/summary` - Purchased and spent totals
/// - `GET /v1/credits/transactions` - Paginated, filterable history
///
/// ## Generation (JWT auth)
/// - `POST /v1/generate` - Generate, store and bill a post
/// - `POST /v1/generate/stream` - Interleaved generation as server-sent events
/// - `GET /v1/artifacts/:id` - Fetch an owned artifact
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;
    let generation_timeout = state.config.generation_route_timeout();

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Accounts
        .route(
            "/accounts/me",
            get(accounts::get_account).delete(accounts::delete_account),
        )
        .route("/accounts", post(accounts::create_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/summary", get(credits::get_summary))
        .route("/credits/transactions", get(credits::list_transactions))
        // Artifacts
        .route("/artifacts/:id", get(artifacts::get_artifact))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )));

    // The pipeline bounds the model interaction itself and reports a timeout as a
    // 504 body, so this layer only has to outlast it.
    let generation_routes = Router::new()
        .route("/generate", post(generate::generate))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .layer(TimeoutLayer::new(generation_timeout));

    // Open streams are capped by the orchestrator, which holds a slot until the
    // stream ends; the response outlives this handler.
    let stream_routes = Router::new().route("/generate/stream", post(generate::generate_stream));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest(
            "/v1",
            api_routes.merge(generation_routes).merge(stream_routes),
        )
        // Webhooks (no rate limit - controlled by the processor)
        .route(
            "/webhooks/stripe",
            post(webhooks::stripe_webhook).layer(TimeoutLayer::new(Duration::from_secs(
                request_timeout_seconds,
            ))),
        )
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
