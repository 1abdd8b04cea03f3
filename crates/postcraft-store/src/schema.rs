//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || 0x00 || sequence`.
    /// Value is the transaction ID.
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// External payment records, keyed by checkout `session_id`.
    pub const PAYMENTS: &str = "payments";

    /// Index: processor `payment_id` → `session_id`.
    pub const PAYMENTS_BY_PAYMENT_ID: &str = "payments_by_payment_id";

    /// Generation artifacts, keyed by `artifact_id`.
    pub const ARTIFACTS: &str = "artifacts";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::PAYMENTS,
        cf::PAYMENTS_BY_PAYMENT_ID,
        cf::ARTIFACTS,
    ]
}
