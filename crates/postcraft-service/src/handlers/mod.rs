//! API handlers.

pub mod accounts;
pub mod artifacts;
pub mod credits;
pub mod generate;
pub mod health;
pub mod webhooks;
