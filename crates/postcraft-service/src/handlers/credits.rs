//! Credit balance, summary and transaction history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use postcraft_core::{LedgerTransaction, TransactionKind};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::{AccountSummary, TransactionQuery};
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Balance in credits.
    pub balance: i64,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.balance(&auth.account_id)?;
    Ok(Json(BalanceResponse { balance }))
}

/// Get purchased and spent totals.
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountSummary>, ApiError> {
    Ok(Json(state.ledger.summary(&auth.account_id)?))
}

/// Transaction list query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListTransactionsQuery {
    /// 1-based page (default: 1).
    #[serde(default)]
    pub page: Option<usize>,
    /// Page size (default: 20, max: 100).
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Kind filter: generation, purchase, refund or bonus.
    #[serde(default)]
    pub kind: Option<String>,
    /// Case-insensitive description search.
    #[serde(default)]
    pub q: Option<String>,
}

impl ListTransactionsQuery {
    fn into_query(self) -> Result<TransactionQuery, ApiError> {
        let kind = self
            .kind
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.parse::<TransactionKind>())
            .transpose()?;
        Ok(TransactionQuery {
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(0),
            kind,
            text: self.q,
        })
    }
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Signed amount (positive = credit, negative = debit).
    pub amount: i64,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Metadata.
    pub metadata: postcraft_core::Metadata,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerTransaction> for TransactionResponse {
    fn from(tx: &LedgerTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            kind: tx.kind,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            metadata: tx.metadata.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub items: Vec<TransactionResponse>,
    /// Matching transactions across all pages.
    pub total_count: usize,
    /// Number of pages.
    pub page_count: usize,
    /// Page returned.
    pub page: usize,
    /// Page size applied.
    pub page_size: usize,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let page = state
        .ledger
        .list_transactions(&auth.account_id, &query.into_query()?)?;

    Ok(Json(ListTransactionsResponse {
        items: page.items.iter().map(TransactionResponse::from).collect(),
        total_count: page.total_count,
        page_count: page.page_count,
        page: page.page,
        page_size: page.page_size,
    }))
}
