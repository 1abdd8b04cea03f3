//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` and
//! `ArtifactStore` traits.
//!
//! `RocksDB` write batches are atomic but reads are not part of them, so every
//! read-modify-write unit takes the store's write lock before re-reading the
//! account. Plain reads never take the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use postcraft_core::{
    Account, AccountId, ArtifactId, ExternalPaymentRecord, GenerationArtifact, LedgerEntry,
    LedgerTransaction, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ops::{self, RefundPlan};
use crate::schema::{all_column_families, cf};
use crate::{
    AccountOpening, ArtifactStore, CheckoutOutcome, HistoryPage, RefundOutcome, Store,
};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize the start of a read-modify-write unit.
    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode a value.
    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn require_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get_account(account_id)?
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }

    /// Stage the updated account, the transaction row and its index entry.
    fn stage_append(
        &self,
        batch: &mut WriteBatch,
        account: &Account,
        transaction: &LedgerTransaction,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;

        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.id),
            Self::serialize(account)?,
        );
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&transaction.id),
            Self::serialize(transaction)?,
        );
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&account.id, transaction.sequence),
            keys::transaction_key(&transaction.id),
        );
        Ok(())
    }

    /// Stage a payment record and its payment-id index entry.
    fn stage_payment(&self, batch: &mut WriteBatch, record: &ExternalPaymentRecord) -> Result<()> {
        let cf_payments = self.cf(cf::PAYMENTS)?;
        batch.put_cf(
            &cf_payments,
            keys::payment_key(&record.session_id),
            Self::serialize(record)?,
        );
        if let Some(payment_id) = &record.payment_id {
            let cf_index = self.cf(cf::PAYMENTS_BY_PAYMENT_ID)?;
            batch.put_cf(
                &cf_index,
                keys::payment_id_key(payment_id),
                keys::payment_key(&record.session_id),
            );
        }
        Ok(())
    }

    /// Index keys for an account's transactions, in sequence order.
    fn account_index(&self, account_id: &AccountId) -> Result<Vec<(Vec<u8>, TransactionId)>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx_id = keys::decode_transaction_id(&value).ok_or_else(|| {
                StoreError::Serialization("malformed transaction index entry".into())
            })?;
            entries.push((key.to_vec(), tx_id));
        }
        Ok(entries)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn open_account(&self, account_id: &AccountId, starting_grant: i64) -> Result<AccountOpening> {
        let _guard = self.lock()?;
        if let Some(account) = self.get_account(account_id)? {
            return Ok(AccountOpening {
                account,
                created: false,
                grant: None,
            });
        }

        let (account, grant) = ops::open(account_id, starting_grant)?;
        let mut batch = WriteBatch::default();
        if let Some(tx) = &grant {
            self.stage_append(&mut batch, &account, tx)?;
        } else {
            let cf_accounts = self.cf(cf::ACCOUNTS)?;
            batch.put_cf(
                &cf_accounts,
                keys::account_key(account_id),
                Self::serialize(&account)?,
            );
        }
        self.write(batch)?;

        tracing::debug!(account_id = %account_id, balance = account.balance, "Account opened");

        Ok(AccountOpening {
            account,
            created: true,
            grant,
        })
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        let _guard = self.lock()?;
        self.require_account(account_id)?;

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        for (index_key, tx_id) in self.account_index(account_id)? {
            batch.delete_cf(&cf_tx, keys::transaction_key(&tx_id));
            batch.delete_cf(&cf_by_account, index_key);
        }
        batch.delete_cf(&cf_accounts, keys::account_key(account_id));

        self.write(batch)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn post_entry(&self, entry: &LedgerEntry) -> Result<LedgerTransaction> {
        let _guard = self.lock()?;
        let mut account = self.require_account(&entry.account_id)?;
        let transaction = account.post(entry)?;

        let mut batch = WriteBatch::default();
        self.stage_append(&mut batch, &account, &transaction)?;
        self.write(batch)?;

        Ok(transaction)
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>> {
        self.get_value(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn list_transactions(&self, account_id: &AccountId) -> Result<Vec<LedgerTransaction>> {
        let mut transactions = Vec::new();
        for (_, tx_id) in self.account_index(account_id)?.into_iter().rev() {
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    fn list_transactions_page(
        &self,
        account_id: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage> {
        let account = self.require_account(account_id)?;
        let total = usize::try_from(account.next_sequence)
            .map_err(|_| StoreError::Serialization("sequence out of range".into()))?;
        let newest = u64::try_from(offset)
            .ok()
            .and_then(|offset| account.next_sequence.checked_sub(offset)?.checked_sub(1));
        let Some(start) = newest else {
            return Ok(HistoryPage {
                transactions: Vec::new(),
                total,
            });
        };

        // Sequences are contiguous from zero, so the window starts at an exact key.
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);
        let from = keys::account_transaction_key(account_id, start);
        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&from, Direction::Reverse));

        let mut transactions = Vec::with_capacity(limit.min(total));
        for item in iter.take(limit) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx_id = keys::decode_transaction_id(&value).ok_or_else(|| {
                StoreError::Serialization("malformed transaction index entry".into())
            })?;
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }
        Ok(HistoryPage { transactions, total })
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn get_payment_by_session(&self, session_id: &str) -> Result<Option<ExternalPaymentRecord>> {
        self.get_value(cf::PAYMENTS, &keys::payment_key(session_id))
    }

    fn get_payment_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<ExternalPaymentRecord>> {
        let cf_index = self.cf(cf::PAYMENTS_BY_PAYMENT_ID)?;
        let session_key = self
            .db
            .get_cf(&cf_index, keys::payment_id_key(payment_id))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match session_key {
            Some(key) => self.get_value(cf::PAYMENTS, &key),
            None => Ok(None),
        }
    }

    fn complete_checkout(
        &self,
        record: &ExternalPaymentRecord,
        entry: &LedgerEntry,
    ) -> Result<CheckoutOutcome> {
        let _guard = self.lock()?;
        if let Some(existing) = self.get_payment_by_session(&record.session_id)? {
            return Ok(CheckoutOutcome::Duplicate(existing));
        }

        let mut account = self.require_account(&record.account_id)?;
        let transaction = ops::checkout(&mut account, record, entry)?;

        let mut batch = WriteBatch::default();
        self.stage_append(&mut batch, &account, &transaction)?;
        self.stage_payment(&mut batch, record)?;
        self.write(batch)?;

        Ok(CheckoutOutcome::Applied {
            record: record.clone(),
            transaction,
        })
    }

    fn record_failed_checkout(&self, record: &ExternalPaymentRecord) -> Result<bool> {
        let _guard = self.lock()?;
        if self.get_payment_by_session(&record.session_id)?.is_some() {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        self.stage_payment(&mut batch, record)?;
        self.write(batch)?;
        Ok(true)
    }

    fn refund_payment(&self, payment_id: &str, description: &str) -> Result<RefundOutcome> {
        let _guard = self.lock()?;
        let Some(mut record) = self.get_payment_by_payment_id(payment_id)? else {
            return Ok(RefundOutcome::NotFound);
        };

        let mut account = self.get_account(&record.account_id)?;
        match ops::refund(&mut record, account.as_mut(), description)? {
            RefundPlan::AlreadyRefunded => Ok(RefundOutcome::AlreadyRefunded(record)),
            RefundPlan::NotRefundable => Ok(RefundOutcome::NotRefundable(record)),
            RefundPlan::Refunded {
                transaction,
                clawed_back,
            } => {
                let mut batch = WriteBatch::default();
                if let (Some(account), Some(tx)) = (&account, &transaction) {
                    self.stage_append(&mut batch, account, tx)?;
                }
                self.stage_payment(&mut batch, &record)?;
                self.write(batch)?;

                Ok(RefundOutcome::Refunded {
                    record,
                    transaction,
                    clawed_back,
                })
            }
        }
    }
}

impl ArtifactStore for RocksStore {
    fn put_artifact(&self, artifact: &GenerationArtifact) -> Result<()> {
        let cf = self.cf(cf::ARTIFACTS)?;
        self.db
            .put_cf(&cf, keys::artifact_key(&artifact.id), Self::serialize(artifact)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_artifact(&self, artifact_id: &ArtifactId) -> Result<Option<GenerationArtifact>> {
        self.get_value(cf::ARTIFACTS, &keys::artifact_key(artifact_id))
    }

    fn delete_artifact(&self, artifact_id: &ArtifactId) -> Result<bool> {
        let existed = self.get_artifact(artifact_id)?.is_some();
        if existed {
            let cf = self.cf(cf::ARTIFACTS)?;
            self.db
                .delete_cf(&cf, keys::artifact_key(artifact_id))
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postcraft_core::{
        GeneratedContent, GenerationMetadata, GenerationMode, GenerationRequest, Length, Platform,
        Tone, TransactionKind,
    };
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn id(s: &str) -> AccountId {
        s.parse().unwrap()
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let user = id("user_reopen");
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.open_account(&user, 10).unwrap();
            let entry = LedgerEntry::generation(user.clone(), 1, "test").unwrap();
            let tx = store.post_entry(&entry).unwrap();
            assert_eq!(tx.balance_after, 9);
            assert_eq!(tx.amount, -1);
        }

        let store = RocksStore::open(dir.path()).unwrap();
        let account = store.get_account(&user).unwrap().unwrap();
        assert_eq!(account.balance, 9);

        let history = store.list_transactions(&user).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionKind::Generation); // Newest first
        assert_eq!(history[1].kind, TransactionKind::Bonus);
    }

    #[test]
    fn insufficient_balance_leaves_no_trace() {
        let (store, _dir) = create_test_store();
        let user = id("user_zero");
        store.open_account(&user, 0).unwrap();

        let entry = LedgerEntry::generation(user.clone(), 1, "test").unwrap();
        let result = store.post_entry(&entry);

        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance {
                balance: 0,
                required: 1
            })
        ));
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 0);
        assert!(store.list_transactions(&user).unwrap().is_empty());
    }

    #[test]
    fn history_is_ordered_past_255_entries() {
        let (store, _dir) = create_test_store();
        let user = id("user_long");
        store.open_account(&user, 300).unwrap();
        for _ in 0..260 {
            let entry = LedgerEntry::generation(user.clone(), 1, "spend").unwrap();
            store.post_entry(&entry).unwrap();
        }

        let history = store.list_transactions(&user).unwrap();
        assert_eq!(history.len(), 261);
        assert!(history.windows(2).all(|w| w[0].sequence == w[1].sequence + 1));
        assert_eq!(history[0].balance_after, 40);
    }

    #[test]
    fn history_page_seeks_to_its_window() {
        let (store, _dir) = create_test_store();
        let user = id("user_paged");
        store.open_account(&user, 300).unwrap();
        for _ in 0..260 {
            let entry = LedgerEntry::generation(user.clone(), 1, "spend").unwrap();
            store.post_entry(&entry).unwrap();
        }

        let first = store.list_transactions_page(&user, 0, 20).unwrap();
        assert_eq!(first.total, 261);
        assert_eq!(first.transactions.len(), 20);
        assert_eq!(first.transactions[0].sequence, 260);
        assert_eq!(first.transactions[19].sequence, 241);

        let last = store.list_transactions_page(&user, 240, 100).unwrap();
        assert_eq!(last.transactions.len(), 21);
        assert_eq!(last.transactions[0].sequence, 20);
        assert_eq!(last.transactions[20].kind, TransactionKind::Bonus);

        let beyond = store.list_transactions_page(&user, 261, 20).unwrap();
        assert!(beyond.transactions.is_empty());
        assert_eq!(beyond.total, 261);
    }

    #[test]
    fn history_page_stays_inside_its_account() {
        let (store, _dir) = create_test_store();
        let (alice, bob) = (id("user_a"), id("user_b"));
        store.open_account(&alice, 5).unwrap();
        store.open_account(&bob, 5).unwrap();
        store
            .post_entry(&LedgerEntry::generation(bob.clone(), 1, "bob").unwrap())
            .unwrap();

        let page = store.list_transactions_page(&alice, 0, 10).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.transactions.len(), 1);
        assert!(page.transactions.iter().all(|tx| tx.account_id == alice));

        assert!(matches!(
            store.list_transactions_page(&id("ghost"), 0, 10),
            Err(StoreError::NotFound { entity: "account", .. })
        ));
    }

    #[test]
    fn concurrent_debits_against_exact_balance_only_one_wins() {
        let (store, _dir) = create_test_store();
        let user = id("user_race");
        store.open_account(&user, 3).unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let entry = LedgerEntry::generation(user.clone(), 3, "race").unwrap();
                        store.post_entry(&entry)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::InsufficientBalance { .. })));
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 0);

        let history = store.list_transactions(&user).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].balance_after, 0);
        assert_eq!(history.iter().map(|tx| tx.amount).sum::<i64>(), 0);
    }

    #[test]
    fn concurrent_checkout_of_one_session_credits_once() {
        let (store, _dir) = create_test_store();
        let user = id("user_checkout_race");
        store.open_account(&user, 0).unwrap();
        let record = ExternalPaymentRecord::completed(
            user.clone(),
            "sess_race".into(),
            Some("pi_race".into()),
            1500,
            "usd".into(),
            150,
        );

        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let entry = LedgerEntry::credit(
                            user.clone(),
                            150,
                            TransactionKind::Purchase,
                            "Popular Pack",
                        )
                        .unwrap();
                        store.complete_checkout(&record, &entry).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, CheckoutOutcome::Applied { .. }))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 150);
        assert_eq!(store.list_transactions(&user).unwrap().len(), 1);
        assert_eq!(
            store.get_payment_by_payment_id("pi_race").unwrap().unwrap().session_id,
            "sess_race"
        );
    }

    #[test]
    fn checkout_and_refund_round() {
        let (store, _dir) = create_test_store();
        let user = id("user_pay");
        store.open_account(&user, 0).unwrap();

        let record = ExternalPaymentRecord::completed(
            user.clone(),
            "sess_1".into(),
            Some("pi_1".into()),
            1500,
            "usd".into(),
            150,
        );
        let entry =
            LedgerEntry::credit(user.clone(), 150, TransactionKind::Purchase, "Popular Pack")
                .unwrap();

        assert!(matches!(
            store.complete_checkout(&record, &entry).unwrap(),
            CheckoutOutcome::Applied { .. }
        ));
        assert!(matches!(
            store.complete_checkout(&record, &entry).unwrap(),
            CheckoutOutcome::Duplicate(_)
        ));
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 150);

        let found = store.get_payment_by_payment_id("pi_1").unwrap().unwrap();
        assert_eq!(found.session_id, "sess_1");

        let outcome = store.refund_payment("pi_1", "Charge refunded").unwrap();
        assert!(matches!(
            outcome,
            RefundOutcome::Refunded {
                clawed_back: 150,
                ..
            }
        ));
        assert_eq!(store.get_account(&user).unwrap().unwrap().balance, 0);
    }

    #[test]
    fn delete_account_removes_history() {
        let (store, _dir) = create_test_store();
        let user = id("user_gone");
        let opening = store.open_account(&user, 10).unwrap();

        store.delete_account(&user).unwrap();

        assert!(store.get_account(&user).unwrap().is_none());
        assert!(store.list_transactions(&user).unwrap().is_empty());
        assert!(store
            .get_transaction(&opening.grant.unwrap().id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn artifact_crud() {
        let (store, _dir) = create_test_store();
        let request =
            GenerationRequest::new("Remote work tips", Tone::Casual, Length::Short, Platform::Twitter)
                .unwrap();
        let artifact = GenerationArtifact::new(
            id("user_art"),
            GeneratedContent {
                content: "Work from anywhere.".into(),
                hashtags: vec!["#RemoteWork".into()],
                best_time_to_post: None,
                total_tokens_used: 42,
                metadata: GenerationMetadata::for_request(&request),
            },
            GenerationMode::Plain,
        );

        store.put_artifact(&artifact).unwrap();
        assert_eq!(store.get_artifact(&artifact.id).unwrap(), Some(artifact.clone()));
        assert!(store.delete_artifact(&artifact.id).unwrap());
        assert!(!store.delete_artifact(&artifact.id).unwrap());
    }
}
