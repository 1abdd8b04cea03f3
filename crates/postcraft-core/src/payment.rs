//! External payment records.
//!
//! One record exists per checkout session seen from the payment processor. The
//! session id is the idempotency key for reconciliation; the processor's payment id
//! locates the record again when a charge is refunded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::{AccountId, PaymentRecordId};

/// A payment processor checkout as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPaymentRecord {
    /// Record ID.
    pub id: PaymentRecordId,

    /// The account that paid.
    pub account_id: AccountId,

    /// Processor checkout session ID (unique).
    pub session_id: String,

    /// Processor payment ID, when the session produced a charge.
    pub payment_id: Option<String>,

    /// Amount paid in minor currency units.
    pub amount_minor: i64,

    /// ISO currency code, lowercase as the processor reports it.
    pub currency: String,

    /// Credits granted by this payment.
    pub credits: i64,

    /// Current status.
    pub status: PaymentStatus,

    /// Processor metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,
}

impl ExternalPaymentRecord {
    /// Create a record for a paid checkout session.
    #[must_use]
    pub fn completed(
        account_id: AccountId,
        session_id: String,
        payment_id: Option<String>,
        amount_minor: i64,
        currency: String,
        credits: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentRecordId::generate(),
            account_id,
            session_id,
            payment_id,
            amount_minor,
            currency,
            credits,
            status: PaymentStatus::Completed,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a record for a checkout session that expired without payment.
    #[must_use]
    pub fn failed(
        account_id: AccountId,
        session_id: String,
        amount_minor: i64,
        currency: String,
        credits: i64,
    ) -> Self {
        let mut record = Self::completed(
            account_id,
            session_id,
            None,
            amount_minor,
            currency,
            credits,
        );
        record.status = PaymentStatus::Failed;
        record
    }

    /// Attach processor metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Credits to claw back when this payment is refunded, given the current balance.
    ///
    /// The clawback never exceeds the balance: credits already spent stay spent.
    #[must_use]
    pub fn clawback_amount(&self, current_balance: i64) -> i64 {
        self.credits.min(current_balance).max(0)
    }

    /// Mark the record refunded.
    ///
    /// `completed → refunded` is the only status change a record may undergo.
    /// Returns `false` (and leaves the record untouched) for any other transition.
    pub fn mark_refunded(&mut self) -> bool {
        if self.status != PaymentStatus::Completed {
            return false;
        }
        self.status = PaymentStatus::Refunded;
        self.updated_at = Utc::now();
        true
    }
}

/// Status of an external payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Paid; credits were granted.
    Completed,

    /// Checkout expired or failed; no credits granted.
    Failed,

    /// Charge refunded; credits clawed back as far as the balance allowed.
    Refunded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(credits: i64) -> ExternalPaymentRecord {
        ExternalPaymentRecord::completed(
            "user_pay".parse().unwrap(),
            "sess_1".into(),
            Some("pi_1".into()),
            1500,
            "usd".into(),
            credits,
        )
    }

    #[test]
    fn clawback_is_clamped_to_balance() {
        let record = record(150);
        assert_eq!(record.clawback_amount(500), 150);
        assert_eq!(record.clawback_amount(40), 40);
        assert_eq!(record.clawback_amount(0), 0);
    }

    #[test]
    fn only_completed_records_can_be_refunded() {
        let mut record = record(150);
        assert!(record.mark_refunded());
        assert_eq!(record.status, PaymentStatus::Refunded);
        assert!(!record.mark_refunded());

        let mut failed = ExternalPaymentRecord::failed(
            "user_pay".parse().unwrap(),
            "sess_2".into(),
            1500,
            "usd".into(),
            150,
        );
        assert!(!failed.mark_refunded());
        assert_eq!(failed.status, PaymentStatus::Failed);
    }
}
