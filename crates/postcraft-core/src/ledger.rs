//! Ledger entry and transaction types for postcraft.
//!
//! A [`LedgerEntry`] is a requested balance change; posting it against an
//! [`Account`](crate::Account) produces an immutable [`LedgerTransaction`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::{AccountId, BillingError, TransactionId};

/// A requested balance change that has not been committed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// The account to post against.
    pub account_id: AccountId,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: i64,

    /// Kind of transaction this entry becomes.
    pub kind: TransactionKind,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata carried onto the transaction.
    pub metadata: Metadata,
}

impl LedgerEntry {
    /// A generation charge of `cost` credits.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if `cost < 1`.
    pub fn generation(
        account_id: AccountId,
        cost: i64,
        description: impl Into<String>,
    ) -> Result<Self, BillingError> {
        if cost < 1 {
            return Err(BillingError::InvalidAmount(format!(
                "debit amount must be at least 1, got {cost}"
            )));
        }
        Ok(Self {
            account_id,
            amount: -cost,
            kind: TransactionKind::Generation,
            description: description.into(),
            metadata: Metadata::new(),
        })
    }

    /// A credit of `amount` credits.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidAmount` if `amount < 1` or `kind` is not a
    /// credit kind.
    pub fn credit(
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Result<Self, BillingError> {
        if amount < 1 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be at least 1, got {amount}"
            )));
        }
        if !kind.is_credit() {
            return Err(BillingError::InvalidAmount(format!(
                "{} is not a credit kind",
                kind.as_str()
            )));
        }
        Ok(Self {
            account_id,
            amount,
            kind,
            description: description.into(),
            metadata: Metadata::new(),
        })
    }

    /// A clawback of previously purchased credits after a charge refund.
    ///
    /// The amount is recorded as a negative `refund` transaction.
    #[must_use]
    pub fn refund_clawback(account_id: AccountId, amount: i64, description: String) -> Self {
        Self {
            account_id,
            amount: -amount.abs(),
            kind: TransactionKind::Refund,
            description,
            metadata: Metadata::new(),
        }
    }

    /// Attach metadata to the entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A committed ledger transaction.
///
/// Transactions are append-only: once written they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique transaction ID.
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Position of this transaction in the account's history (0-based, gap-free).
    pub sequence: u64,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: i64,

    /// Kind of transaction.
    pub kind: TransactionKind,

    /// Human-readable description.
    pub description: String,

    /// Balance immediately after this transaction.
    pub balance_after: i64,

    /// Additional metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Balance immediately before this transaction.
    #[must_use]
    pub const fn balance_before(&self) -> i64 {
        self.balance_after - self.amount
    }
}

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits consumed by an AI generation.
    Generation,

    /// Credits bought through the payment processor.
    Purchase,

    /// Refund, either a credit back to the user or a clawback after a charge refund.
    Refund,

    /// Promotional credits, including the starting grant.
    Bonus,
}

impl TransactionKind {
    /// Whether this kind may be used with the plain credit path.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Purchase | Self::Refund | Self::Bonus)
    }

    /// The wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generation" => Ok(Self::Generation),
            "purchase" => Ok(Self::Purchase),
            "refund" => Ok(Self::Refund),
            "bonus" => Ok(Self::Bonus),
            other => Err(BillingError::Validation(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }
}
