//! Credit ledger service.
//!
//! Every balance mutation goes through [`Store::post_entry`], which re-reads the
//! balance and appends the transaction row in one atomic unit. Nothing here retries
//! a mutation: transient storage errors are handed back to the caller.

use std::sync::Arc;

use serde::Serialize;

use postcraft_core::{
    Account, AccountId, BillingError, LedgerEntry, LedgerTransaction, Metadata, TransactionId,
    TransactionKind,
};
use postcraft_store::{AccountOpening, Store, StoreError};

/// Default page size for transaction listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Errors reported by the ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// A debit would take the balance below zero.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Balance at commit time.
        balance: i64,
        /// Amount requested.
        required: i64,
    },

    /// The amount or kind is not allowed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The store failed; the caller may retry.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound(id),
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            StoreError::InvalidEntry(msg) => Self::InvalidAmount(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<BillingError> for LedgerError {
    fn from(err: BillingError) -> Self {
        StoreError::from(err).into()
    }
}

/// Outcome of a committed debit or credit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posting {
    /// Balance after the transaction.
    pub new_balance: i64,
    /// The new transaction's ID.
    pub transaction_id: TransactionId,
    /// The full transaction row.
    #[serde(skip)]
    pub transaction: LedgerTransaction,
}

impl From<LedgerTransaction> for Posting {
    fn from(transaction: LedgerTransaction) -> Self {
        Self {
            new_balance: transaction.balance_after,
            transaction_id: transaction.id,
            transaction,
        }
    }
}

/// Aggregates derived from an account's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    /// Current balance.
    pub current_balance: i64,
    /// Sum of purchase credits.
    pub total_purchased: i64,
    /// Sum of generation debits, as a positive number.
    pub total_spent: i64,
    /// Number of transactions on record.
    pub transaction_count: usize,
}

/// Filters and paging for [`LedgerService::list_transactions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    /// 1-based page number. `0` is treated as `1`.
    pub page: usize,
    /// Items per page. `0` means [`DEFAULT_PAGE_SIZE`]; capped at [`MAX_PAGE_SIZE`].
    pub page_size: usize,
    /// Only transactions of this kind.
    pub kind: Option<TransactionKind>,
    /// Only transactions whose description contains this text, ignoring case.
    pub text: Option<String>,
}

impl TransactionQuery {
    fn normalized(&self) -> (usize, usize) {
        let page = self.page.max(1);
        let page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        (page, page_size)
    }

    fn matches(&self, tx: &LedgerTransaction, needle: Option<&str>) -> bool {
        if self.kind.is_some_and(|kind| tx.kind != kind) {
            return false;
        }
        needle.map_or(true, |needle| {
            tx.description.to_lowercase().contains(needle)
        })
    }
}

/// One page of transactions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionPage {
    /// Transactions on this page.
    pub items: Vec<LedgerTransaction>,
    /// Transactions matching the filters across all pages.
    pub total_count: usize,
    /// Number of pages at this page size.
    pub page_count: usize,
    /// The page returned.
    pub page: usize,
    /// The page size applied.
    pub page_size: usize,
}

/// The credit ledger.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
    starting_grant: i64,
}

impl LedgerService {
    /// Create a ledger over `store`. New accounts receive `starting_grant` credits.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, starting_grant: i64) -> Self {
        Self {
            store,
            starting_grant,
        }
    }

    /// Get or create the account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if the store fails.
    pub fn open_account(&self, account_id: &AccountId) -> Result<AccountOpening, LedgerError> {
        let opening = self.store.open_account(account_id, self.starting_grant)?;
        if opening.created {
            tracing::info!(
                account_id = %account_id,
                starting_grant = opening.grant.as_ref().map_or(0, |tx| tx.amount),
                "Account opened"
            );
        }
        Ok(opening)
    }

    /// Fetch the account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if it does not exist.
    pub fn account(&self, account_id: &AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account does not exist.
    pub fn balance(&self, account_id: &AccountId) -> Result<i64, LedgerError> {
        Ok(self.account(account_id)?.balance)
    }

    /// Delete the account and its history.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if it does not exist.
    pub fn delete_account(&self, account_id: &AccountId) -> Result<(), LedgerError> {
        self.store.delete_account(account_id)?;
        tracing::info!(account_id = %account_id, "Account deleted");
        Ok(())
    }

    /// Whether the balance covers `required`. Reads only.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account does not exist, so a
    /// missing account can be told apart from an empty one.
    pub fn has_sufficient_balance(
        &self,
        account_id: &AccountId,
        required: i64,
    ) -> Result<bool, LedgerError> {
        Ok(self.account(account_id)?.has_sufficient_balance(required))
    }

    /// Take `amount` credits for a generation.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount < 1`.
    /// - `LedgerError::InsufficientBalance` if the balance at commit time is short.
    /// - `LedgerError::AccountNotFound` if the account does not exist.
    pub fn debit(
        &self,
        account_id: &AccountId,
        amount: i64,
        description: &str,
    ) -> Result<Posting, LedgerError> {
        self.debit_with_metadata(account_id, amount, description, Metadata::new())
    }

    /// [`debit`](Self::debit) with metadata carried onto the transaction.
    ///
    /// # Errors
    ///
    /// Same as [`debit`](Self::debit).
    pub fn debit_with_metadata(
        &self,
        account_id: &AccountId,
        amount: i64,
        description: &str,
        metadata: Metadata,
    ) -> Result<Posting, LedgerError> {
        let entry = LedgerEntry::generation(account_id.clone(), amount, description)?
            .with_metadata(metadata);
        self.post(&entry)
    }

    /// Add `amount` credits of a credit kind (`purchase`, `refund` or `bonus`).
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount < 1` or `kind` is `generation`.
    /// - `LedgerError::AccountNotFound` if the account does not exist.
    pub fn credit(
        &self,
        account_id: &AccountId,
        amount: i64,
        kind: TransactionKind,
        description: &str,
    ) -> Result<Posting, LedgerError> {
        let entry = LedgerEntry::credit(account_id.clone(), amount, kind, description)?;
        self.post(&entry)
    }

    /// Give `amount` credits back to the user.
    ///
    /// # Errors
    ///
    /// Same as [`credit`](Self::credit).
    pub fn refund(
        &self,
        account_id: &AccountId,
        amount: i64,
        reason: &str,
    ) -> Result<Posting, LedgerError> {
        self.credit(account_id, amount, TransactionKind::Refund, reason)
    }

    fn post(&self, entry: &LedgerEntry) -> Result<Posting, LedgerError> {
        match self.store.post_entry(entry) {
            Ok(tx) => {
                tracing::info!(
                    account_id = %tx.account_id,
                    transaction_id = %tx.id,
                    kind = tx.kind.as_str(),
                    amount = tx.amount,
                    balance_after = tx.balance_after,
                    "Ledger entry posted"
                );
                Ok(tx.into())
            }
            Err(err) => {
                let err = LedgerError::from(err);
                if let LedgerError::InsufficientBalance { balance, required } = &err {
                    tracing::info!(
                        account_id = %entry.account_id,
                        balance,
                        required,
                        "Debit rejected: insufficient balance"
                    );
                }
                Err(err)
            }
        }
    }

    /// Purchased and spent totals derived from the full history.
    ///
    /// Every figure comes from one history read, so a debit committed while the
    /// summary is built shows up in all of them or in none.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account does not exist.
    pub fn summary(&self, account_id: &AccountId) -> Result<AccountSummary, LedgerError> {
        self.account(account_id)?;
        let history = self.store.list_transactions(account_id)?;
        let current_balance = history.first().map_or(0, |newest| newest.balance_after);

        let mut total_purchased = 0;
        let mut total_spent = 0;
        let mut replayed = 0;
        for tx in &history {
            replayed += tx.amount;
            match tx.kind {
                TransactionKind::Purchase if tx.amount > 0 => total_purchased += tx.amount,
                TransactionKind::Generation if tx.amount < 0 => total_spent += tx.amount.abs(),
                _ => {}
            }
        }

        if replayed != current_balance {
            tracing::error!(
                account_id = %account_id,
                recorded_balance = current_balance,
                replayed_balance = replayed,
                reconciliation_needed = true,
                "Account balance disagrees with its transaction history"
            );
        }

        Ok(AccountSummary {
            current_balance,
            total_purchased,
            total_spent,
            transaction_count: history.len(),
        })
    }

    /// Filtered, paginated history, newest first.
    ///
    /// Without filters only the requested page is read from the store.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account does not exist.
    pub fn list_transactions(
        &self,
        account_id: &AccountId,
        query: &TransactionQuery,
    ) -> Result<TransactionPage, LedgerError> {
        let (page, page_size) = query.normalized();
        let offset = (page - 1).saturating_mul(page_size);
        let needle = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let (items, total_count) = if query.kind.is_none() && needle.is_none() {
            let window = self
                .store
                .list_transactions_page(account_id, offset, page_size)?;
            (window.transactions, window.total)
        } else {
            self.account(account_id)?;
            let matching: Vec<LedgerTransaction> = self
                .store
                .list_transactions(account_id)?
                .into_iter()
                .filter(|tx| query.matches(tx, needle.as_deref()))
                .collect();
            let total_count = matching.len();
            let items = matching.into_iter().skip(offset).take(page_size).collect();
            (items, total_count)
        };

        Ok(TransactionPage {
            items,
            total_count,
            page_count: total_count.div_ceil(page_size),
            page,
            page_size,
        })
    }
}
