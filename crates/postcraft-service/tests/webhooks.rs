//! Stripe webhook integration tests.
//!
//! Deliveries are signed locally with the harness secret, so no Stripe account
//! is needed.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, WEBHOOK_SECRET};
use serde_json::{json, Value};

use postcraft_core::{AccountId, LedgerEntry, PaymentStatus, TransactionKind};
use postcraft_service::crypto::sign_stripe_payload;
use postcraft_store::Store;

fn account() -> AccountId {
    "user_integration".parse().unwrap()
}

fn checkout_completed(session: &str, credits: Value) -> Value {
    json!({
        "id": format!("evt_{session}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session,
                "payment_status": "paid",
                "payment_intent": format!("pi_{session}"),
                "amount_total": 1500,
                "currency": "usd",
                "metadata": {
                    "accountId": "user_integration",
                    "credits": credits,
                    "packageName": "Popular Pack"
                }
            }
        }
    })
}

#[tokio::test]
async fn checkout_is_credited_exactly_once() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let event = checkout_completed("cs_test_1", json!("150"));

    let first = harness.deliver_webhook(&event).await;
    first.assert_status_ok();
    first.assert_json(&json!({ "received": true }));

    harness.deliver_webhook(&event).await.assert_status_ok();

    let account = harness.store.get_account(&account()).unwrap().unwrap();
    assert_eq!(account.balance, 160);
    assert_eq!(account.lifetime_purchased, 150);

    let purchases: Vec<_> = harness
        .store
        .list_transactions(&account.id)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Purchase)
        .collect();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].description, "Purchased Popular Pack (150 credits)");

    let record = harness
        .store
        .get_payment_by_session("cs_test_1")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn refund_claws_back_only_what_is_left() {
    let harness = TestHarness::new();
    harness.open_account().await;
    harness
        .deliver_webhook(&checkout_completed("cs_test_2", json!(100)))
        .await
        .assert_status_ok();

    // 110 after purchase, spend 80 so 30 remain of the purchased credits.
    let spend = LedgerEntry::generation(account(), 80, "Generated posts").unwrap();
    harness.store.post_entry(&spend).unwrap();

    let refund = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": "ch_1",
                "payment_intent": "pi_cs_test_2",
                "amount": 1500,
                "amount_refunded": 1500
            }
        }
    });
    harness.deliver_webhook(&refund).await.assert_status_ok();
    harness.deliver_webhook(&refund).await.assert_status_ok();

    let account = harness.store.get_account(&account()).unwrap().unwrap();
    assert_eq!(account.balance, 0);

    let refunds: Vec<_> = harness
        .store
        .list_transactions(&account.id)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, -30);
}

#[tokio::test]
async fn malformed_paid_checkout_is_refused_for_redelivery() {
    let harness = TestHarness::new();
    harness.open_account().await;

    harness
        .deliver_webhook(&checkout_completed("cs_test_bad", json!("lots")))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(harness.store.get_account(&account()).unwrap().unwrap().balance, 10);
    assert!(harness
        .store
        .get_payment_by_session("cs_test_bad")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn bad_signatures_are_rejected() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let payload = checkout_completed("cs_test_3", json!(100)).to_string();
    let now = chrono::Utc::now().timestamp();

    let wrong_secret = sign_stripe_payload(&payload, "whsec_other", now);
    let stale = sign_stripe_payload(&payload, WEBHOOK_SECRET, now - 3600);

    for signature in [wrong_secret, stale] {
        harness
            .server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", signature)
            .text(payload.clone())
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    harness
        .server
        .post("/webhooks/stripe")
        .text(payload)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(harness.store.get_account(&account()).unwrap().unwrap().balance, 10);
}

#[tokio::test]
async fn unknown_events_are_acknowledged() {
    let harness = TestHarness::new();

    let event = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });
    let response = harness.deliver_webhook(&event).await;
    response.assert_status_ok();
    response.assert_json(&json!({ "received": true }));
}

#[tokio::test]
async fn expired_checkout_is_recorded_as_failed() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let mut event = checkout_completed("cs_test_expired", json!(100));
    event["type"] = json!("checkout.session.expired");
    event["data"]["object"]["payment_status"] = json!("unpaid");

    harness.deliver_webhook(&event).await.assert_status_ok();

    let record = harness
        .store
        .get_payment_by_session("cs_test_expired")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
    assert_eq!(harness.store.get_account(&account()).unwrap().unwrap().balance, 10);
}

#[cfg(not(feature = "unsigned-webhooks"))]
#[tokio::test]
async fn deliveries_are_refused_without_a_webhook_secret() {
    let harness = TestHarness::with_config(|config| config.stripe_webhook_secret = None);
    harness.open_account().await;

    let response = harness
        .server
        .post("/webhooks/stripe")
        .text(checkout_completed("cs_test_unsigned", json!(1_000_000)).to_string())
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(harness.store.get_account(&account()).unwrap().unwrap().balance, 10);
    assert!(harness
        .store
        .get_payment_by_session("cs_test_unsigned")
        .unwrap()
        .is_none());
}
