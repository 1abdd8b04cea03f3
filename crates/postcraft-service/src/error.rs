//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use postcraft_core::BillingError;
use postcraft_generation::GenerationError;
use postcraft_store::StoreError;

use crate::ledger::LedgerError;
use crate::orchestrator::{GenerationFailure, OrchestrationError};
use crate::reconciliation::ReconcileError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Insufficient credits.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The model provider failed.
    #[error("generation failed: {0}")]
    Upstream(String),

    /// The model provider did not answer in time.
    #[error("generation timed out: {0}")]
    GatewayTimeout(String),

    /// The service is at capacity.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON body for this error. Internal errors are logged here.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (code, message, details) = match self {
            Self::Unauthorized => ("unauthorized", self.to_string(), None),
            Self::NotFound(msg) => ("not_found", msg.clone(), None),
            Self::BadRequest(msg) => ("bad_request", msg.clone(), None),
            Self::InsufficientBalance { balance, required } => (
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::Upstream(msg) => ("generation_failed", msg.clone(), None),
            Self::GatewayTimeout(msg) => ("generation_timeout", msg.clone(), None),
            Self::Unavailable(msg) => ("unavailable", msg.clone(), None),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                ("internal_error", "An internal error occurred".to_string(), None)
            }
        };
        ErrorBody {
            code,
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { error: self.body() };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            StoreError::InvalidEntry(msg) => Self::BadRequest(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            BillingError::AccountNotFound { .. } => Self::NotFound("Account not found".into()),
            BillingError::InvalidAmount(msg) | BillingError::Validation(msg) => {
                Self::BadRequest(msg)
            }
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(_) => Self::NotFound("Account not found".into()),
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            LedgerError::InvalidAmount(msg) => Self::BadRequest(msg),
            LedgerError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::AccountNotFound(_) => Self::NotFound("Account not found".into()),
            OrchestrationError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            OrchestrationError::Generation(e @ GenerationError::Timeout(_)) => {
                Self::GatewayTimeout(e.to_string())
            }
            OrchestrationError::Generation(e) => Self::Upstream(e.to_string()),
            e @ OrchestrationError::StreamsExhausted => Self::Unavailable(e.to_string()),
            e @ (OrchestrationError::Persistence(_)
            | OrchestrationError::Billing(_)
            | OrchestrationError::Storage(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<GenerationFailure> for ApiError {
    fn from(failure: GenerationFailure) -> Self {
        failure.error.into()
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Storage(msg) => Self::Internal(msg),
            other => Self::BadRequest(other.to_string()),
        }
    }
}
