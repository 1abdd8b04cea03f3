//! Ledger storage layer for postcraft.
//!
//! This crate provides durable storage for account balances, the append-only
//! transaction log, external payment records and generation artifacts.
//!
//! Two backends implement the same traits:
//!
//! - [`MemoryStore`]: process-local, used by tests and ephemeral deployments
//! - [`RocksStore`]: `RocksDB` with column families (feature `rocksdb-backend`)
//!
//! # Atomicity
//!
//! Every operation that reads a balance and writes it back (posting an entry,
//! completing a checkout, refunding a payment) runs as one serialized unit: the
//! balance is re-read inside the unit and the account, the transaction row and any
//! payment record are committed together or not at all.
//!
//! # Example
//!
//! ```
//! use postcraft_core::{AccountId, LedgerEntry};
//! use postcraft_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let id: AccountId = "user_123".parse().unwrap();
//! store.open_account(&id, 10).unwrap();
//!
//! let entry = LedgerEntry::generation(id.clone(), 1, "Generated post").unwrap();
//! let tx = store.post_entry(&entry).unwrap();
//! assert_eq!(tx.balance_after, 9);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
mod ops;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use postcraft_core::{
    Account, AccountId, ArtifactId, ExternalPaymentRecord, GenerationArtifact, LedgerEntry,
    LedgerTransaction, TransactionId,
};

/// Result of opening an account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountOpening {
    /// The account as stored after the call.
    pub account: Account,
    /// Whether this call created the account.
    pub created: bool,
    /// The starting-grant transaction, when one was posted.
    pub grant: Option<LedgerTransaction>,
}

/// A window of an account's history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    /// Transactions in the window.
    pub transactions: Vec<LedgerTransaction>,
    /// Number of transactions the account had when the window was read.
    pub total: usize,
}

/// Result of applying a paid checkout.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// The record was inserted and the account credited.
    Applied {
        /// The new payment record.
        record: ExternalPaymentRecord,
        /// The purchase transaction.
        transaction: LedgerTransaction,
    },
    /// The session was already recorded; nothing changed.
    Duplicate(ExternalPaymentRecord),
}

/// Result of refunding a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum RefundOutcome {
    /// The record was marked refunded and credits clawed back.
    Refunded {
        /// The updated payment record.
        record: ExternalPaymentRecord,
        /// The clawback transaction (absent when nothing was left to claw back).
        transaction: Option<LedgerTransaction>,
        /// Credits actually deducted.
        clawed_back: i64,
    },
    /// The record was already refunded; nothing changed.
    AlreadyRefunded(ExternalPaymentRecord),
    /// The record never granted credits (failed checkout); nothing changed.
    NotRefundable(ExternalPaymentRecord),
    /// No record carries this payment id.
    NotFound,
}

/// The storage trait defining all ledger operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get or create an account.
    ///
    /// A newly created account receives `starting_grant` credits as a `bonus`
    /// transaction in the same atomic unit. Opening an existing account changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn open_account(&self, account_id: &AccountId, starting_grant: i64) -> Result<AccountOpening>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Delete an account and its transaction history.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn delete_account(&self, account_id: &AccountId) -> Result<()>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Post a ledger entry: re-read the balance, apply the entry and append the
    /// transaction atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientBalance` if a debit exceeds the balance at commit time.
    /// - `StoreError::InvalidEntry` for zero amounts.
    fn post_entry(&self, entry: &LedgerEntry) -> Result<LedgerTransaction>;

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>>;

    /// List all transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(&self, account_id: &AccountId) -> Result<Vec<LedgerTransaction>>;

    /// Read `limit` transactions, newest first, after skipping the `offset` newest.
    ///
    /// Only the requested window is loaded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account does not exist, or an error
    /// if the database operation fails.
    fn list_transactions_page(
        &self,
        account_id: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Get a payment record by checkout session ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment_by_session(&self, session_id: &str) -> Result<Option<ExternalPaymentRecord>>;

    /// Get a payment record by processor payment ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment_by_payment_id(&self, payment_id: &str)
        -> Result<Option<ExternalPaymentRecord>>;

    /// Insert a completed payment record and post its purchase entry atomically.
    ///
    /// If a record for the session already exists the call is a no-op and returns
    /// [`CheckoutOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InvalidEntry` if the entry does not belong to the record's account.
    fn complete_checkout(
        &self,
        record: &ExternalPaymentRecord,
        entry: &LedgerEntry,
    ) -> Result<CheckoutOutcome>;

    /// Insert a failed payment record unless the session is already recorded.
    ///
    /// Returns `true` if the record was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_failed_checkout(&self, record: &ExternalPaymentRecord) -> Result<bool>;

    /// Refund the completed payment carrying `payment_id`.
    ///
    /// Atomically marks the record refunded and claws back
    /// `min(balance, credits)` as a negative `refund` transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn refund_payment(&self, payment_id: &str, description: &str) -> Result<RefundOutcome>;
}

/// Storage for generation artifacts.
///
/// Artifacts are owned by the content collaborator; the ledger core only creates
/// them and deletes them again when billing fails.
pub trait ArtifactStore: Send + Sync {
    /// Insert or replace an artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_artifact(&self, artifact: &GenerationArtifact) -> Result<()>;

    /// Get an artifact by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_artifact(&self, artifact_id: &ArtifactId) -> Result<Option<GenerationArtifact>>;

    /// Delete an artifact. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_artifact(&self, artifact_id: &ArtifactId) -> Result<bool>;
}
