//! Stateless password-reset tokens.
//!
//! A token is `base64url(payload).base64url(mac)` where the payload is the
//! JSON `{"uid": .., "exp": ..}` and the MAC is HMAC-SHA256 over the encoded
//! payload, keyed with the application secret. Nothing is stored server-side.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ResetClaims {
    uid: String,
    exp: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size")
}

pub fn sign_reset_token(secret: &[u8], user_id: &str, ttl: Duration, now: DateTime<Utc>) -> String {
    let claims = ResetClaims {
        uid: user_id.to_string(),
        exp: (now + ttl).timestamp(),
    };
    // Serializing a struct of a String and an i64 cannot fail
    let payload = BASE64_URL.encode(serde_json::to_vec(&claims).unwrap_or_default());

    let mut signer = mac(secret);
    signer.update(payload.as_bytes());
    let signature = BASE64_URL.encode(signer.finalize().into_bytes());

    format!("{}.{}", payload, signature)
}

/// Check signature then expiry, returning the bound user id.
pub fn verify_reset_token(secret: &[u8], token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
    let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let signature = BASE64_URL.decode(signature).map_err(|_| TokenError::Malformed)?;

    let mut verifier = mac(secret);
    verifier.update(payload.as_bytes());
    verifier
        .verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    let claims: ResetClaims = BASE64_URL
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(TokenError::Malformed)?;

    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(claims.uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn token_redeems_to_its_user() {
        let now = Utc::now();
        let token = sign_reset_token(SECRET, "user-1", Duration::seconds(600), now);
        assert_eq!(verify_reset_token(SECRET, &token, now), Ok("user-1".to_string()));
        assert_eq!(
            verify_reset_token(SECRET, &token, now + Duration::seconds(599)),
            Ok("user-1".to_string())
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let token = sign_reset_token(SECRET, "user-1", Duration::seconds(600), now);
        assert_eq!(
            verify_reset_token(SECRET, &token, now + Duration::seconds(601)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let now = Utc::now();
        let token = sign_reset_token(SECRET, "user-1", Duration::seconds(600), now);
        assert_eq!(
            verify_reset_token(b"another-secret", &token, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = Utc::now();
        let token = sign_reset_token(SECRET, "user-1", Duration::seconds(600), now);
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = ResetClaims { uid: "user-2".to_string(), exp: now.timestamp() + 600 };
        let forged_payload = BASE64_URL.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}", forged_payload, signature);
        assert_eq!(verify_reset_token(SECRET, &forged, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let now = Utc::now();
        assert_eq!(verify_reset_token(SECRET, "no-dot-here", now), Err(TokenError::Malformed));
        assert_eq!(verify_reset_token(SECRET, "abc.!!!", now), Err(TokenError::Malformed));
    }
}
