//! Error types for postcraft storage.

use postcraft_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity type (e.g., "account").
        entity: &'static str,
        /// The ID that was not found.
        id: String,
    },

    /// Insufficient credits for a debit.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The ledger entry was rejected.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

impl StoreError {
    /// Shorthand for a missing account.
    #[must_use]
    pub fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }
}

impl From<BillingError> for StoreError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            BillingError::AccountNotFound { account_id } => Self::account_not_found(account_id),
            BillingError::InvalidAmount(msg) | BillingError::Validation(msg) => {
                Self::InvalidEntry(msg)
            }
            BillingError::InvalidId(e) => Self::InvalidEntry(e.to_string()),
        }
    }
}
