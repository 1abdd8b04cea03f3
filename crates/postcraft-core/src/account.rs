//! Account types for postcraft.
//!
//! An account holds the denormalized running balance. Every balance change goes
//! through [`Account::post`], which enforces the non-negative floor and assigns the
//! next sequence number, so all storage backends apply identical rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, BillingError, LedgerEntry, LedgerTransaction, TransactionId, TransactionKind};

/// Credits granted when an account is first opened.
pub const DEFAULT_STARTING_GRANT: i64 = 10;

/// A billing account for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID (from the authentication layer).
    pub id: AccountId,

    /// Current credit balance. Never negative after a committed mutation.
    pub balance: i64,

    /// Lifetime credits purchased.
    pub lifetime_purchased: i64,

    /// Lifetime credits spent on generations.
    pub lifetime_spent: i64,

    /// Lifetime net refund movement (credits back minus clawbacks).
    pub lifetime_refunded: i64,

    /// Lifetime bonus credits, including the starting grant.
    pub lifetime_bonus: i64,

    /// Sequence number the next transaction will receive.
    pub next_sequence: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance and no history.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            lifetime_purchased: 0,
            lifetime_spent: 0,
            lifetime_refunded: 0,
            lifetime_bonus: 0,
            next_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a charge of `required` credits.
    #[must_use]
    pub fn has_sufficient_balance(&self, required: i64) -> bool {
        self.balance >= required
    }

    /// Apply a ledger entry to this account and produce the resulting transaction.
    ///
    /// The account is only modified when the entry is accepted. Callers must persist
    /// the updated account and the returned transaction in one atomic unit.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` for a zero amount, an entry addressed to a
    ///   different account, or arithmetic overflow.
    /// - `BillingError::InsufficientBalance` if the entry would drive the balance
    ///   below zero.
    pub fn post(&mut self, entry: &LedgerEntry) -> Result<LedgerTransaction, BillingError> {
        if entry.account_id != self.id {
            return Err(BillingError::InvalidAmount(format!(
                "entry for {} posted against {}",
                entry.account_id, self.id
            )));
        }
        if entry.amount == 0 {
            return Err(BillingError::InvalidAmount(
                "ledger entries must move the balance".into(),
            ));
        }

        let new_balance = self
            .balance
            .checked_add(entry.amount)
            .ok_or_else(|| BillingError::InvalidAmount("balance overflow".into()))?;

        if new_balance < 0 {
            return Err(BillingError::InsufficientBalance {
                balance: self.balance,
                required: entry.amount.saturating_neg(),
            });
        }

        match entry.kind {
            TransactionKind::Generation => self.lifetime_spent += entry.amount.abs(),
            TransactionKind::Purchase => self.lifetime_purchased += entry.amount,
            TransactionKind::Refund => self.lifetime_refunded += entry.amount,
            TransactionKind::Bonus => self.lifetime_bonus += entry.amount,
        }

        let now = Utc::now();
        let transaction = LedgerTransaction {
            id: TransactionId::generate(),
            account_id: self.id.clone(),
            sequence: self.next_sequence,
            amount: entry.amount,
            kind: entry.kind,
            description: entry.description.clone(),
            balance_after: new_balance,
            metadata: entry.metadata.clone(),
            created_at: now,
        };

        self.balance = new_balance;
        self.next_sequence += 1;
        self.updated_at = now;

        Ok(transaction)
    }
}
