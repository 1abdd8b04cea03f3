//! Webhook signature verification.
//!
//! The payment processor signs each delivery with
//! `stripe-signature: t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where the HMAC is
//! computed over `"<t>.<raw body>"` with the endpoint's shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signed timestamp and now, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Why a signature header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The header has no `t=` component or it is not a number.
    #[error("signature header has no valid timestamp")]
    MissingTimestamp,

    /// The header carries no `v1=` signature.
    #[error("signature header has no v1 signature")]
    MissingSignature,

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance ({age}s)")]
    Expired {
        /// Age of the timestamp in seconds (negative for the future).
        age: i64,
    },

    /// No signature matched.
    #[error("signature mismatch")]
    Mismatch,
}

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded by
/// the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a `stripe-signature` header against the raw request body.
///
/// `now` is the current unix time in seconds; the signed timestamp may differ from
/// it by at most `tolerance_seconds` in either direction.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify_stripe_signature(
    header: &str,
    payload: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let signed_at: i64 = timestamp
        .and_then(|ts| ts.parse().ok())
        .ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let age = now - signed_at;
    if age.abs() > tolerance_seconds {
        return Err(SignatureError::Expired { age });
    }

    let expected = hmac_sha256_hex(secret, &format!("{signed_at}.{payload}"));
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a valid header for `payload`, as the processor would.
#[must_use]
pub fn sign_stripe_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"));
    format!("t={timestamp},v1={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn hmac_sha256_produces_correct_length() {
        let result = hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog");
        assert_eq!(result.len(), 64);
        assert_eq!(
            result,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn constant_time_eq_compares_strings() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }

    #[test]
    fn accepts_a_freshly_signed_payload() {
        let body = r#"{"type":"checkout.session.completed"}"#;
        let header = sign_stripe_payload(body, SECRET, NOW);
        assert_eq!(verify_stripe_signature(&header, body, SECRET, 300, NOW + 10), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = "{}";
        let good = hmac_sha256_hex(SECRET, &format!("{NOW}.{body}"));
        let header = format!("t={NOW},v1=deadbeef,v1={good}");
        assert_eq!(verify_stripe_signature(&header, body, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_stripe_payload(r#"{"credits":10}"#, SECRET, NOW);
        assert_eq!(
            verify_stripe_signature(&header, r#"{"credits":9999}"#, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign_stripe_payload("{}", "whsec_other", NOW);
        assert_eq!(
            verify_stripe_signature(&header, "{}", SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_stripe_payload("{}", SECRET, NOW - 301);
        assert_eq!(
            verify_stripe_signature(&header, "{}", SECRET, 300, NOW),
            Err(SignatureError::Expired { age: 301 })
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(
            verify_stripe_signature("v1=abc", "{}", SECRET, 300, NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_stripe_signature("t=notanumber,v1=abc", "{}", SECRET, 300, NOW),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_stripe_signature(&format!("t={NOW}"), "{}", SECRET, 300, NOW),
            Err(SignatureError::MissingSignature)
        );
    }
}
