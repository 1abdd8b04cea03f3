//! Account and credit endpoint integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

use postcraft_core::{AccountId, LedgerEntry, TransactionKind};
use postcraft_store::Store;

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn open_account_grants_starting_credits_once() {
    let harness = TestHarness::new();

    let first = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", harness.user_auth_header())
        .await;
    first.assert_status(StatusCode::CREATED);
    let body: Value = first.json();
    assert_eq!(body["account_id"], "user_integration");
    assert_eq!(body["balance"], 10);
    assert_eq!(body["lifetime_bonus"], 10);

    let second = harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", harness.user_auth_header())
        .await;
    second.assert_status_ok();
    let body: Value = second.json();
    assert_eq!(body["balance"], 10);

    let account: AccountId = "user_integration".parse().unwrap();
    assert_eq!(harness.store.list_transactions(&account).unwrap().len(), 1);
}

#[tokio::test]
async fn requests_without_valid_token_are_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/accounts/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_missing_account_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn delete_account_removes_it() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .delete("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "deleted": true }));

    harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Credits
// ============================================================================

#[tokio::test]
async fn balance_and_summary_follow_the_ledger() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let account: AccountId = "user_integration".parse().unwrap();
    let purchase = LedgerEntry::credit(
        account.clone(),
        150,
        TransactionKind::Purchase,
        "Purchased Popular Pack (150 credits)",
    )
    .unwrap();
    harness.store.post_entry(&purchase).unwrap();
    let spend = LedgerEntry::generation(account, 2, "Generated LinkedIn post").unwrap();
    harness.store.post_entry(&spend).unwrap();

    let balance: Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance, json!({ "balance": 158 }));

    let summary: Value = harness
        .server
        .get("/v1/credits/summary")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(summary["currentBalance"], 158);
    assert_eq!(summary["totalPurchased"], 150);
    assert_eq!(summary["totalSpent"], 2);
    assert_eq!(summary["transactionCount"], 3);
}

#[tokio::test]
async fn transactions_are_paged_and_filtered() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let account: AccountId = "user_integration".parse().unwrap();
    for n in 0..5 {
        let spend =
            LedgerEntry::generation(account.clone(), 1, format!("Generated post {n}")).unwrap();
        harness.store.post_entry(&spend).unwrap();
    }

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("page_size", 2)
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let page: Value = response.json();
    assert_eq!(page["total_count"], 6);
    assert_eq!(page["page_count"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["items"][0]["description"], "Generated post 4");
    assert_eq!(page["items"][0]["amount"], -1);

    let filtered: Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("kind", "bonus")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(filtered["total_count"], 1);
    assert_eq!(filtered["items"][0]["kind"], "bonus");

    let searched: Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("q", "POST 3")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(searched["total_count"], 1);

    harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("kind", "lottery")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}
