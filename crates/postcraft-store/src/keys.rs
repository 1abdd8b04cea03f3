//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.

use postcraft_core::{AccountId, ArtifactId, TransactionId};

/// Separator between the account ID and the sequence in index keys.
///
/// Account IDs never contain control characters, so the separator cannot collide
/// with an ID that is a prefix of another.
const SEPARATOR: u8 = 0x00;

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id || 0x00 || sequence (u64 big-endian)`
///
/// Big-endian sequences sort numerically, so a prefix scan yields the account's
/// history in commit order.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
    let mut key = account_transactions_prefix(account_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Create a prefix for iterating all transactions for an account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(account_id.as_bytes().len() + 9);
    key.extend_from_slice(account_id.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Decode a transaction ID stored as an index value.
///
/// Returns `None` if the value is not 16 bytes.
#[must_use]
pub fn decode_transaction_id(value: &[u8]) -> Option<TransactionId> {
    let bytes: [u8; 16] = value.try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}

/// Create a payment key from a checkout session ID.
#[must_use]
pub fn payment_key(session_id: &str) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

/// Create a payment-id index key.
#[must_use]
pub fn payment_id_key(payment_id: &str) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Create an artifact key from an artifact ID.
#[must_use]
pub fn artifact_key(artifact_id: &ArtifactId) -> Vec<u8> {
    artifact_id.as_bytes().to_vec()
}
