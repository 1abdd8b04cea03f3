//! Authentication extractor.
//!
//! Users authenticate with an HS256 bearer token issued by the identity provider.
//! The `sub` claim is the account id; nothing else about the user is trusted or
//! stored here.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use postcraft_core::AccountId;

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The account the request acts on.
    pub account_id: AccountId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        // Gated so the bypass never exists in production builds.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(account) = token.strip_prefix("test-token:") {
            let account_id = account.parse().map_err(|_| ApiError::Unauthorized)?;
            return Ok(AuthUser { account_id });
        }

        let secret = state.config.auth_jwt_secret.as_deref().ok_or_else(|| {
            tracing::warn!("AUTH_JWT_SECRET not configured, rejecting bearer token");
            ApiError::Unauthorized
        })?;
        let claims = validate_jwt(token, secret, &state.config.auth_audience)?;

        let account_id = claims.sub.parse().map_err(|_| {
            tracing::debug!(sub = %claims.sub, "JWT subject is not a valid account id");
            ApiError::Unauthorized
        })?;
        Ok(AuthUser { account_id })
    }
}

/// Claims carried by a user token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account id).
    pub sub: String,
    /// Audience (string or array).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Validate an HS256 token's signature, expiry and audience.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` for any invalid token.
pub fn validate_jwt(token: &str, secret: &str, audience: &str) -> Result<JwtClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);

    decode::<JwtClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, aud: &str, exp_offset: i64, secret: &str) -> String {
        let claims = JwtClaims {
            sub: sub.into(),
            aud: Some(serde_json::json!(aud)),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iat: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_subject() {
        let claims = validate_jwt(&token("user_1", "postcraft", 600, SECRET), SECRET, "postcraft")
            .unwrap();
        assert_eq!(claims.sub, "user_1");
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let result = validate_jwt(&token("user_1", "other", 600, SECRET), SECRET, "postcraft");
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let result = validate_jwt(&token("user_1", "postcraft", -600, SECRET), SECRET, "postcraft");
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let result = validate_jwt(&token("user_1", "postcraft", 600, "nope"), SECRET, "postcraft");
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
