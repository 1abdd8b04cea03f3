//! Payment reconciliation.
//!
//! Applies verified payment-processor events to the ledger exactly once. The
//! checkout session id and the processor payment id are the idempotency keys; every
//! handler may be replayed any number of times and converges after the first
//! successful application.

use std::sync::Arc;

use serde_json::Value;

use postcraft_core::metadata::metadata_from_json;
use postcraft_core::{
    AccountId, ExternalPaymentRecord, LedgerEntry, MetadataValue, TransactionKind,
};
use postcraft_store::{CheckoutOutcome, RefundOutcome, Store, StoreError};

/// Checkout completed (paid or pending).
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
/// Checkout expired without payment.
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
/// A charge was refunded.
pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// Errors that make a delivery fail, so the processor redelivers it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// A required field is missing from the event object.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Checkout metadata is present but unusable.
    #[error("invalid checkout metadata: {0}")]
    InvalidMetadata(String),

    /// The paying account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// What a delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A paid checkout credited the account.
    CheckoutApplied {
        /// Checkout session.
        session_id: String,
        /// Credited account.
        account_id: AccountId,
        /// Credits granted.
        credits: i64,
        /// Balance after the purchase.
        balance_after: i64,
    },
    /// The session was already recorded.
    Duplicate {
        /// Checkout session.
        session_id: String,
    },
    /// The checkout completed without payment; nothing to credit yet.
    Unpaid {
        /// Checkout session.
        session_id: String,
    },
    /// An expired checkout was recorded as failed (or skipped).
    ExpiredRecorded {
        /// Checkout session, when the payload named one.
        session_id: Option<String>,
        /// Whether a new record was written.
        inserted: bool,
    },
    /// A refunded charge clawed credits back.
    Refunded {
        /// Processor payment id.
        payment_id: String,
        /// Credits actually deducted.
        clawed_back: i64,
    },
    /// A refund that changes nothing (already refunded, never paid, or unknown).
    RefundIgnored {
        /// Processor payment id, when the payload named one.
        payment_id: Option<String>,
    },
    /// Event type the ledger does not act on.
    Ignored,
}

/// Checkout fields the ledger needs.
#[derive(Debug)]
struct Checkout {
    session_id: String,
    account_id: AccountId,
    credits: i64,
    package_name: Option<String>,
    payment_id: Option<String>,
    amount_minor: i64,
    currency: String,
}

impl Checkout {
    fn parse(session_id: String, object: &Value) -> Result<Self, ReconcileError> {
        let metadata = object.get("metadata").unwrap_or(&Value::Null);

        let raw_account = str_field(metadata, "accountId")
            .or_else(|| str_field(object, "client_reference_id"))
            .ok_or(ReconcileError::MissingField("metadata.accountId"))?;
        let account_id = raw_account
            .parse()
            .map_err(|_| ReconcileError::InvalidMetadata(format!("bad accountId {raw_account:?}")))?;

        let credits = metadata
            .get("credits")
            .ok_or(ReconcileError::MissingField("metadata.credits"))?;
        let credits = MetadataValue::from_json(credits)
            .and_then(|v| v.as_i64())
            .filter(|c| *c > 0)
            .ok_or_else(|| ReconcileError::InvalidMetadata(format!("bad credits {credits}")))?;

        Ok(Self {
            session_id,
            account_id,
            credits,
            package_name: str_field(metadata, "packageName").map(str::to_string),
            payment_id: str_field(object, "payment_intent").map(str::to_string),
            amount_minor: object
                .get("amount_total")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            currency: str_field(object, "currency").unwrap_or("usd").to_string(),
        })
    }

    fn description(&self) -> String {
        match &self.package_name {
            Some(name) => format!("Purchased {name} ({} credits)", self.credits),
            None => format!("Purchased {} credits", self.credits),
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Applies processor events to the ledger.
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn Store>,
}

impl ReconciliationService {
    /// Create a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply one verified event. `object` is the event's `data.object`.
    ///
    /// # Errors
    ///
    /// Only checkout-completed deliveries fail: malformed metadata, a missing
    /// account or a storage error. Expired checkouts, refunds of unknown payments
    /// and unknown event types are logged and acknowledged.
    pub fn handle_external_event(
        &self,
        event_type: &str,
        object: &Value,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match event_type {
            CHECKOUT_COMPLETED => self.checkout_completed(object),
            CHECKOUT_EXPIRED => Ok(self.checkout_expired(object)),
            CHARGE_REFUNDED => self.charge_refunded(object),
            other => {
                tracing::debug!(event_type = %other, "Ignoring payment event");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    fn checkout_completed(&self, object: &Value) -> Result<ReconcileOutcome, ReconcileError> {
        let session_id = str_field(object, "id")
            .ok_or(ReconcileError::MissingField("id"))?
            .to_string();

        let payment_status = str_field(object, "payment_status").unwrap_or("unknown");
        if payment_status != "paid" {
            tracing::info!(
                session_id = %session_id,
                payment_status = %payment_status,
                "Checkout session not paid yet, skipping"
            );
            return Ok(ReconcileOutcome::Unpaid { session_id });
        }

        if self.store.get_payment_by_session(&session_id)?.is_some() {
            tracing::info!(session_id = %session_id, "Duplicate checkout delivery");
            return Ok(ReconcileOutcome::Duplicate { session_id });
        }

        let checkout = Checkout::parse(session_id.clone(), object).map_err(|e| {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                reconciliation_needed = true,
                "Paid checkout carries unusable metadata"
            );
            e
        })?;

        let record = ExternalPaymentRecord::completed(
            checkout.account_id.clone(),
            checkout.session_id.clone(),
            checkout.payment_id.clone(),
            checkout.amount_minor,
            checkout.currency.clone(),
            checkout.credits,
        )
        .with_metadata(metadata_from_json(
            object.get("metadata").unwrap_or(&Value::Null),
        ));

        let mut entry_metadata = postcraft_core::Metadata::new();
        entry_metadata.insert("sessionId".into(), checkout.session_id.clone().into());
        if let Some(name) = &checkout.package_name {
            entry_metadata.insert("packageName".into(), name.clone().into());
        }
        let entry = LedgerEntry::credit(
            checkout.account_id.clone(),
            checkout.credits,
            TransactionKind::Purchase,
            checkout.description(),
        )
        .map_err(|e| ReconcileError::InvalidMetadata(e.to_string()))?
        .with_metadata(entry_metadata);

        match self.store.complete_checkout(&record, &entry) {
            Ok(CheckoutOutcome::Applied { transaction, .. }) => {
                tracing::info!(
                    session_id = %checkout.session_id,
                    account_id = %checkout.account_id,
                    credits = checkout.credits,
                    balance_after = transaction.balance_after,
                    transaction_id = %transaction.id,
                    "Checkout applied"
                );
                Ok(ReconcileOutcome::CheckoutApplied {
                    session_id: checkout.session_id,
                    account_id: checkout.account_id,
                    credits: checkout.credits,
                    balance_after: transaction.balance_after,
                })
            }
            Ok(CheckoutOutcome::Duplicate(_)) => {
                tracing::info!(session_id = %checkout.session_id, "Duplicate checkout delivery");
                Ok(ReconcileOutcome::Duplicate {
                    session_id: checkout.session_id,
                })
            }
            Err(e) => {
                let err = ReconcileError::from(e);
                tracing::warn!(
                    session_id = %checkout.session_id,
                    account_id = %checkout.account_id,
                    error = %err,
                    "Checkout could not be applied"
                );
                Err(err)
            }
        }
    }

    fn checkout_expired(&self, object: &Value) -> ReconcileOutcome {
        let session_id = str_field(object, "id").map(str::to_string);
        let skipped = ReconcileOutcome::ExpiredRecorded {
            session_id: session_id.clone(),
            inserted: false,
        };
        let Some(session) = session_id.clone() else {
            tracing::warn!("Expired checkout without session id");
            return skipped;
        };

        let metadata = object.get("metadata").unwrap_or(&Value::Null);
        let Some(account_id) = str_field(metadata, "accountId")
            .or_else(|| str_field(object, "client_reference_id"))
            .and_then(|raw| raw.parse::<AccountId>().ok())
        else {
            tracing::warn!(session_id = %session, "Expired checkout without usable account id");
            return skipped;
        };
        let credits = metadata
            .get("credits")
            .and_then(MetadataValue::from_json)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let record = ExternalPaymentRecord::failed(
            account_id,
            session.clone(),
            object.get("amount_total").and_then(Value::as_i64).unwrap_or(0),
            str_field(object, "currency").unwrap_or("usd").to_string(),
            credits,
        )
        .with_metadata(metadata_from_json(metadata));

        match self.store.record_failed_checkout(&record) {
            Ok(inserted) => {
                tracing::info!(session_id = %session, inserted, "Expired checkout recorded");
                ReconcileOutcome::ExpiredRecorded {
                    session_id,
                    inserted,
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session, error = %e, "Failed to record expired checkout");
                skipped
            }
        }
    }

    fn charge_refunded(&self, object: &Value) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(payment_id) = str_field(object, "payment_intent") else {
            tracing::warn!(
                charge_id = str_field(object, "id").unwrap_or("unknown"),
                "Refunded charge has no payment id"
            );
            return Ok(ReconcileOutcome::RefundIgnored { payment_id: None });
        };

        let amount = object.get("amount").and_then(Value::as_i64);
        let amount_refunded = object.get("amount_refunded").and_then(Value::as_i64);
        if let (Some(amount), Some(refunded)) = (amount, amount_refunded) {
            if refunded < amount {
                tracing::warn!(
                    payment_id = %payment_id,
                    amount,
                    amount_refunded = refunded,
                    "Partial charge refund treated as full clawback"
                );
            }
        }

        let description = format!("Charge refunded ({payment_id})");
        let ignored = ReconcileOutcome::RefundIgnored {
            payment_id: Some(payment_id.to_string()),
        };
        match self.store.refund_payment(payment_id, &description)? {
            RefundOutcome::Refunded {
                record,
                transaction,
                clawed_back,
            } => {
                tracing::info!(
                    payment_id = %payment_id,
                    account_id = %record.account_id,
                    credits_granted = record.credits,
                    clawed_back,
                    balance_after = transaction.as_ref().map(|tx| tx.balance_after),
                    "Charge refund applied"
                );
                Ok(ReconcileOutcome::Refunded {
                    payment_id: payment_id.to_string(),
                    clawed_back,
                })
            }
            RefundOutcome::AlreadyRefunded(_) => {
                tracing::info!(payment_id = %payment_id, "Charge already refunded");
                Ok(ignored)
            }
            RefundOutcome::NotRefundable(_) => {
                tracing::warn!(payment_id = %payment_id, "Refund for a checkout that never paid");
                Ok(ignored)
            }
            RefundOutcome::NotFound => {
                tracing::warn!(payment_id = %payment_id, "Refund for unknown payment");
                Ok(ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postcraft_core::PaymentStatus;
    use postcraft_store::MemoryStore;
    use serde_json::json;

    fn account() -> AccountId {
        "user_reconcile".parse().unwrap()
    }

    fn setup(grant: i64) -> (Arc<MemoryStore>, ReconciliationService) {
        let store = Arc::new(MemoryStore::new());
        store.open_account(&account(), grant).unwrap();
        let service = ReconciliationService::new(store.clone());
        (store, service)
    }

    fn paid_checkout(session: &str, credits: Value) -> Value {
        json!({
            "id": session,
            "payment_status": "paid",
            "payment_intent": format!("pi_{session}"),
            "amount_total": 1500,
            "currency": "usd",
            "metadata": {
                "accountId": "user_reconcile",
                "credits": credits,
                "packageName": "Popular Pack"
            }
        })
    }

    #[test]
    fn duplicate_checkout_credits_once() {
        let (store, service) = setup(10);
        let event = paid_checkout("sess_1", json!("150"));

        let first = service
            .handle_external_event(CHECKOUT_COMPLETED, &event)
            .unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::CheckoutApplied {
                session_id: "sess_1".into(),
                account_id: account(),
                credits: 150,
                balance_after: 160,
            }
        );
        for _ in 0..3 {
            let again = service
                .handle_external_event(CHECKOUT_COMPLETED, &event)
                .unwrap();
            assert_eq!(
                again,
                ReconcileOutcome::Duplicate {
                    session_id: "sess_1".into()
                }
            );
        }

        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 160);
        let purchases: Vec<_> = store
            .list_transactions(&account())
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::Purchase)
            .collect();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].description, "Purchased Popular Pack (150 credits)");

        let record = store.get_payment_by_session("sess_1").unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.credits, 150);
        assert_eq!(record.payment_id.as_deref(), Some("pi_sess_1"));
    }

    #[test]
    fn integer_credits_and_client_reference_fallback() {
        let (store, service) = setup(0);
        let event = json!({
            "id": "sess_ref",
            "payment_status": "paid",
            "client_reference_id": "user_reconcile",
            "metadata": { "credits": 50 }
        });
        service
            .handle_external_event(CHECKOUT_COMPLETED, &event)
            .unwrap();
        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 50);
    }

    #[test]
    fn unpaid_checkout_is_acknowledged_without_credit() {
        let (store, service) = setup(10);
        let mut event = paid_checkout("sess_unpaid", json!(100));
        event["payment_status"] = json!("unpaid");

        let outcome = service
            .handle_external_event(CHECKOUT_COMPLETED, &event)
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Unpaid { .. }));
        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 10);
        assert!(store.get_payment_by_session("sess_unpaid").unwrap().is_none());
    }

    #[test]
    fn malformed_metadata_fails_without_side_effects() {
        let (store, service) = setup(10);

        for credits in [json!(0), json!(-5), json!("lots"), json!(null)] {
            let event = paid_checkout("sess_bad", credits);
            let err = service
                .handle_external_event(CHECKOUT_COMPLETED, &event)
                .unwrap_err();
            assert!(matches!(err, ReconcileError::InvalidMetadata(_)), "{err:?}");
        }

        let event = json!({ "id": "sess_bad", "payment_status": "paid", "metadata": { "credits": 5 } });
        assert_eq!(
            service.handle_external_event(CHECKOUT_COMPLETED, &event),
            Err(ReconcileError::MissingField("metadata.accountId"))
        );

        assert!(store.get_payment_by_session("sess_bad").unwrap().is_none());
        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 10);
    }

    #[test]
    fn checkout_for_missing_account_fails() {
        let (_store, service) = setup(10);
        let mut event = paid_checkout("sess_ghost", json!(10));
        event["metadata"]["accountId"] = json!("ghost");
        assert_eq!(
            service.handle_external_event(CHECKOUT_COMPLETED, &event),
            Err(ReconcileError::AccountNotFound("ghost".into()))
        );
    }

    #[test]
    fn refund_clamps_to_remaining_balance() {
        let (store, service) = setup(0);
        service
            .handle_external_event(CHECKOUT_COMPLETED, &paid_checkout("sess_r", json!(100)))
            .unwrap();
        let spend = LedgerEntry::generation(account(), 70, "Generated posts").unwrap();
        store.post_entry(&spend).unwrap();

        let refund = json!({ "id": "ch_1", "payment_intent": "pi_sess_r", "amount": 1500, "amount_refunded": 1500 });
        let outcome = service
            .handle_external_event(CHARGE_REFUNDED, &refund)
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Refunded {
                payment_id: "pi_sess_r".into(),
                clawed_back: 30,
            }
        );
        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 0);

        let clawback = &store.list_transactions(&account()).unwrap()[0];
        assert_eq!(clawback.kind, TransactionKind::Refund);
        assert_eq!(clawback.amount, -30);

        let again = service
            .handle_external_event(CHARGE_REFUNDED, &refund)
            .unwrap();
        assert!(matches!(again, ReconcileOutcome::RefundIgnored { .. }));
        assert_eq!(store.list_transactions(&account()).unwrap().len(), 3);
        assert_eq!(
            store.get_payment_by_payment_id("pi_sess_r").unwrap().unwrap().status,
            PaymentStatus::Refunded
        );
    }

    #[test]
    fn refund_of_unknown_payment_is_swallowed() {
        let (_store, service) = setup(10);
        let outcome = service
            .handle_external_event(CHARGE_REFUNDED, &json!({ "payment_intent": "pi_nope" }))
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::RefundIgnored {
                payment_id: Some("pi_nope".into())
            }
        );
        let outcome = service
            .handle_external_event(CHARGE_REFUNDED, &json!({ "id": "ch_2" }))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::RefundIgnored { payment_id: None });
    }

    #[test]
    fn expired_checkout_records_failure_once() {
        let (store, service) = setup(10);
        let event = json!({
            "id": "sess_exp",
            "amount_total": 500,
            "metadata": { "accountId": "user_reconcile", "credits": "50" }
        });

        let first = service.handle_external_event(CHECKOUT_EXPIRED, &event).unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::ExpiredRecorded {
                session_id: Some("sess_exp".into()),
                inserted: true
            }
        );
        let second = service.handle_external_event(CHECKOUT_EXPIRED, &event).unwrap();
        assert!(matches!(
            second,
            ReconcileOutcome::ExpiredRecorded { inserted: false, .. }
        ));

        let record = store.get_payment_by_session("sess_exp").unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Failed);
        assert_eq!(store.get_account(&account()).unwrap().unwrap().balance, 10);
    }

    #[test]
    fn malformed_expired_checkout_is_swallowed() {
        let (_store, service) = setup(10);
        let outcome = service
            .handle_external_event(CHECKOUT_EXPIRED, &json!({ "metadata": "garbage" }))
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::ExpiredRecorded {
                session_id: None,
                inserted: false
            }
        );
    }

    #[test]
    fn unknown_events_are_ignored() {
        let (_store, service) = setup(10);
        assert_eq!(
            service.handle_external_event("invoice.paid", &json!({})),
            Ok(ReconcileOutcome::Ignored)
        );
    }
}
