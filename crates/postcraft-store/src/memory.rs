//! In-memory storage implementation.
//!
//! All state sits behind one mutex, so every trait method is trivially a single
//! atomic unit. Mutations are computed on copies and only written back once every
//! step has succeeded.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use postcraft_core::{
    Account, AccountId, ArtifactId, ExternalPaymentRecord, GenerationArtifact, LedgerEntry,
    LedgerTransaction, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::ops::{self, RefundPlan};
use crate::{AccountOpening, ArtifactStore, CheckoutOutcome, HistoryPage, RefundOutcome, Store};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, LedgerTransaction>,
    /// Transaction IDs per account in sequence order.
    by_account: HashMap<AccountId, Vec<TransactionId>>,
    /// Payment records keyed by session ID.
    payments: HashMap<String, ExternalPaymentRecord>,
    /// Payment ID → session ID.
    payments_by_payment_id: HashMap<String, String>,
    artifacts: HashMap<ArtifactId, GenerationArtifact>,
}

impl State {
    fn append(&mut self, account: Account, transaction: LedgerTransaction) {
        self.by_account
            .entry(account.id.clone())
            .or_default()
            .push(transaction.id);
        self.transactions.insert(transaction.id, transaction);
        self.accounts.insert(account.id.clone(), account);
    }

    fn insert_payment(&mut self, record: ExternalPaymentRecord) {
        if let Some(payment_id) = &record.payment_id {
            self.payments_by_payment_id
                .insert(payment_id.clone(), record.session_id.clone());
        }
        self.payments.insert(record.session_id.clone(), record);
    }

    fn account(&self, account_id: &AccountId) -> Result<Account> {
        self.accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }
}

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn open_account(&self, account_id: &AccountId, starting_grant: i64) -> Result<AccountOpening> {
        let mut state = self.lock()?;
        if let Some(account) = state.accounts.get(account_id) {
            return Ok(AccountOpening {
                account: account.clone(),
                created: false,
                grant: None,
            });
        }

        let (account, grant) = ops::open(account_id, starting_grant)?;
        match &grant {
            Some(tx) => state.append(account.clone(), tx.clone()),
            None => {
                state.accounts.insert(account_id.clone(), account.clone());
            }
        }

        Ok(AccountOpening {
            account,
            created: true,
            grant,
        })
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(account_id).cloned())
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        let mut state = self.lock()?;
        if state.accounts.remove(account_id).is_none() {
            return Err(StoreError::account_not_found(account_id));
        }
        for tx_id in state.by_account.remove(account_id).unwrap_or_default() {
            state.transactions.remove(&tx_id);
        }
        Ok(())
    }

    fn post_entry(&self, entry: &LedgerEntry) -> Result<LedgerTransaction> {
        let mut state = self.lock()?;
        let mut account = state.account(&entry.account_id)?;
        let transaction = account.post(entry)?;
        state.append(account, transaction.clone());
        Ok(transaction)
    }

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<LedgerTransaction>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    fn list_transactions(&self, account_id: &AccountId) -> Result<Vec<LedgerTransaction>> {
        let state = self.lock()?;
        let ids = state.by_account.get(account_id).map_or(&[][..], Vec::as_slice);
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }

    fn list_transactions_page(
        &self,
        account_id: &AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage> {
        let state = self.lock()?;
        state.account(account_id)?;
        let ids = state.by_account.get(account_id).map_or(&[][..], Vec::as_slice);
        Ok(HistoryPage {
            transactions: ids
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .filter_map(|id| state.transactions.get(id).cloned())
                .collect(),
            total: ids.len(),
        })
    }

    fn get_payment_by_session(&self, session_id: &str) -> Result<Option<ExternalPaymentRecord>> {
        Ok(self.lock()?.payments.get(session_id).cloned())
    }

    fn get_payment_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<ExternalPaymentRecord>> {
        let state = self.lock()?;
        Ok(state
            .payments_by_payment_id
            .get(payment_id)
            .and_then(|session_id| state.payments.get(session_id))
            .cloned())
    }

    fn complete_checkout(
        &self,
        record: &ExternalPaymentRecord,
        entry: &LedgerEntry,
    ) -> Result<CheckoutOutcome> {
        let mut state = self.lock()?;
        if let Some(existing) = state.payments.get(&record.session_id) {
            return Ok(CheckoutOutcome::Duplicate(existing.clone()));
        }

        let mut account = state.account(&record.account_id)?;
        let transaction = ops::checkout(&mut account, record, entry)?;

        state.append(account, transaction.clone());
        state.insert_payment(record.clone());

        Ok(CheckoutOutcome::Applied {
            record: record.clone(),
            transaction,
        })
    }

    fn record_failed_checkout(&self, record: &ExternalPaymentRecord) -> Result<bool> {
        let mut state = self.lock()?;
        if state.payments.contains_key(&record.session_id) {
            return Ok(false);
        }
        state.insert_payment(record.clone());
        Ok(true)
    }

    fn refund_payment(&self, payment_id: &str, description: &str) -> Result<RefundOutcome> {
        let mut state = self.lock()?;
        let Some(mut record) = state
            .payments_by_payment_id
            .get(payment_id)
            .and_then(|session_id| state.payments.get(session_id))
            .cloned()
        else {
            return Ok(RefundOutcome::NotFound);
        };

        let mut account = state.accounts.get(&record.account_id).cloned();
        match ops::refund(&mut record, account.as_mut(), description)? {
            RefundPlan::AlreadyRefunded => Ok(RefundOutcome::AlreadyRefunded(record)),
            RefundPlan::NotRefundable => Ok(RefundOutcome::NotRefundable(record)),
            RefundPlan::Refunded {
                transaction,
                clawed_back,
            } => {
                if let (Some(account), Some(tx)) = (account, &transaction) {
                    state.append(account, tx.clone());
                }
                state.insert_payment(record.clone());
                Ok(RefundOutcome::Refunded {
                    record,
                    transaction,
                    clawed_back,
                })
            }
        }
    }
}

impl ArtifactStore for MemoryStore {
    fn put_artifact(&self, artifact: &GenerationArtifact) -> Result<()> {
        self.lock()?.artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    fn get_artifact(&self, artifact_id: &ArtifactId) -> Result<Option<GenerationArtifact>> {
        Ok(self.lock()?.artifacts.get(artifact_id).cloned())
    }

    fn delete_artifact(&self, artifact_id: &ArtifactId) -> Result<bool> {
        Ok(self.lock()?.artifacts.remove(artifact_id).is_some())
    }
}
