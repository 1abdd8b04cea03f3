//! Payment processor webhooks.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::crypto::verify_stripe_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Stripe webhook payload (simplified).
#[derive(Debug, Deserialize)]
pub struct StripeWebhook {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event ID.
    pub id: String,
    /// Event data.
    pub data: StripeEventData,
}

/// Stripe event data container.
#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    /// Event object.
    pub object: serde_json::Value,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
///
/// The signature is checked against the raw body before anything is parsed; only
/// verified events reach reconciliation. A non-2xx answer makes the processor
/// redeliver.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

        verify_stripe_signature(
            signature,
            &body,
            secret,
            state.config.webhook_tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Invalid Stripe webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        unverified_delivery()?;
    }

    let webhook: StripeWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received Stripe webhook"
    );

    state
        .reconciliation
        .handle_external_event(&webhook.event_type, &webhook.data.object)
        .map_err(|e| {
            tracing::warn!(
                event_type = %webhook.event_type,
                event_id = %webhook.id,
                error = %e,
                "Stripe webhook rejected, expecting redelivery"
            );
            ApiError::from(e)
        })?;

    Ok(Json(WebhookResponse { received: true }))
}

/// Decide what happens to a delivery when no webhook secret is configured.
///
/// Deliveries are refused unless the `unsigned-webhooks` feature is enabled.
#[cfg(not(feature = "unsigned-webhooks"))]
fn unverified_delivery() -> Result<(), ApiError> {
    tracing::error!("Stripe webhook secret not configured - refusing unverifiable delivery");
    Err(ApiError::Internal(
        "webhook signature verification is not configured".into(),
    ))
}

#[cfg(feature = "unsigned-webhooks")]
#[allow(clippy::unnecessary_wraps)]
fn unverified_delivery() -> Result<(), ApiError> {
    tracing::warn!("Stripe webhook secret not configured - accepting unsigned delivery");
    Ok(())
}
