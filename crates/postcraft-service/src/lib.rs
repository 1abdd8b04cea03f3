//! Postcraft HTTP API Service.
//!
//! This crate provides the HTTP API for postcraft, including:
//!
//! - Account management and the credit ledger
//! - Billed post generation, batch and streamed
//! - Stripe payment webhooks
//!
//! # Authentication
//!
//! End users authenticate with HS256 JWTs whose `sub` claim is the account id.
//! Webhooks are authenticated by their Stripe signature instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for consistency

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod orchestrator;
pub mod reconciliation;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::LedgerService;
pub use orchestrator::Orchestrator;
pub use reconciliation::ReconciliationService;
pub use routes::create_router;
pub use state::AppState;
