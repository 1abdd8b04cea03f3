//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use postcraft_core::Account;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Lifetime credits purchased.
    pub lifetime_purchased: i64,
    /// Lifetime credits spent on generations.
    pub lifetime_spent: i64,
    /// Lifetime net refund movement.
    pub lifetime_refunded: i64,
    /// Lifetime bonus credits.
    pub lifetime_bonus: i64,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.to_string(),
            balance: account.balance,
            lifetime_purchased: account.lifetime_purchased,
            lifetime_spent: account.lifetime_spent,
            lifetime_refunded: account.lifetime_refunded,
            lifetime_bonus: account.lifetime_bonus,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Open the caller's account, granting starting credits the first time.
///
/// Returns `201 Created` for a new account and `200 OK` when it already existed.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let opening = state.ledger.open_account(&auth.account_id)?;
    let status = if opening.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AccountResponse::from(&opening.account))))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.account(&auth.account_id)?;
    Ok(Json(AccountResponse::from(&account)))
}

/// Delete the current user's account and its history.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.ledger.delete_account(&auth.account_id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
