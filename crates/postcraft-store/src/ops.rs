//! Ledger rules shared by every backend.
//!
//! Backends read the current state inside their atomic unit, hand it to these
//! functions, and persist whatever comes back. Keeping the rules here means the
//! memory and `RocksDB` stores cannot drift apart.

use postcraft_core::{
    Account, AccountId, ExternalPaymentRecord, LedgerEntry, LedgerTransaction, PaymentStatus,
    TransactionKind,
};

use crate::error::{Result, StoreError};

/// Build a fresh account and, for a positive grant, its starting-grant transaction.
pub(crate) fn open(
    account_id: &AccountId,
    starting_grant: i64,
) -> Result<(Account, Option<LedgerTransaction>)> {
    let mut account = Account::new(account_id.clone());
    if starting_grant <= 0 {
        return Ok((account, None));
    }
    let entry = LedgerEntry::credit(
        account_id.clone(),
        starting_grant,
        TransactionKind::Bonus,
        "Welcome credits",
    )?;
    let grant = account.post(&entry)?;
    Ok((account, Some(grant)))
}

/// Apply a paid checkout's purchase entry to the account.
pub(crate) fn checkout(
    account: &mut Account,
    record: &ExternalPaymentRecord,
    entry: &LedgerEntry,
) -> Result<LedgerTransaction> {
    if entry.account_id != record.account_id {
        return Err(StoreError::InvalidEntry(
            "checkout entry and payment record name different accounts".into(),
        ));
    }
    if entry.kind != TransactionKind::Purchase || entry.amount < 1 {
        return Err(StoreError::InvalidEntry(
            "checkout entries must be positive purchases".into(),
        ));
    }
    Ok(account.post(entry)?)
}

/// What a refund did to the record and the account.
pub(crate) enum RefundPlan {
    AlreadyRefunded,
    NotRefundable,
    Refunded {
        transaction: Option<LedgerTransaction>,
        clawed_back: i64,
    },
}

/// Mark `record` refunded and claw back what the balance allows.
///
/// `account` is `None` when the account has since been deleted; the record is
/// still marked refunded so later deliveries stay no-ops.
pub(crate) fn refund(
    record: &mut ExternalPaymentRecord,
    account: Option<&mut Account>,
    description: &str,
) -> Result<RefundPlan> {
    match record.status {
        PaymentStatus::Refunded => return Ok(RefundPlan::AlreadyRefunded),
        PaymentStatus::Failed => return Ok(RefundPlan::NotRefundable),
        PaymentStatus::Completed => {}
    }

    let mut transaction = None;
    let mut clawed_back = 0;
    if let Some(account) = account {
        clawed_back = record.clawback_amount(account.balance);
        if clawed_back > 0 {
            let entry = LedgerEntry::refund_clawback(
                record.account_id.clone(),
                clawed_back,
                description.to_string(),
            );
            transaction = Some(account.post(&entry)?);
        }
    }
    record.mark_refunded();

    Ok(RefundPlan::Refunded {
        transaction,
        clawed_back,
    })
}
