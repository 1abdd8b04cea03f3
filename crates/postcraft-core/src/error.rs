//! Error types for postcraft.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in ledger and domain operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// Insufficient credits for the operation.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Invalid amount or ledger entry.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
