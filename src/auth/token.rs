//! Stateless bearer credentials.
//!
//! Credentials are compact HS256 tokens (`base64url(header).base64url
//! (claims).base64url(sig)`) signed with a process-wide key held for the
//! process lifetime. Verification reconstructs the session identity from
//! the claims alone; no storage lookup happens on this path. Key rotation
//! at runtime is a follow-on capability, not implemented.

use super::SessionIdentity;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Fixed JOSE header for every credential this gateway issues.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Verification failure, collapsed into two outward signals so callers
/// cannot distinguish malformed from mis-signed from expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No Authorization material present at all.
    #[error("missing credential")]
    Missing,
    /// Wrong scheme, malformed token, bad signature, or expired.
    #[error("invalid credential")]
    Invalid,
}

/// Signed claims. `sub`/`email`/`roles` reconstruct the identity; `exp` is
/// a fixed 24h-style deadline set at issuance, never refreshed.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    email: String,
    roles: Vec<String>,
    iat: u64,
    exp: u64,
}

/// Process-wide signing and verification key.
pub struct CredentialKey {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl CredentialKey {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl_secs,
        }
    }

    /// Issue a credential for an authenticated account.
    pub fn issue(&self, user_id: i64, email: &str, roles: &[String]) -> String {
        self.issue_at(user_id, email, roles, epoch_secs())
    }

    fn issue_at(&self, user_id: i64, email: &str, roles: &[String], now: u64) -> String {
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            roles: roles.to_vec(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        // Claims serialization cannot fail: no maps, no non-string keys.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();

        let mut token = format!("{}.{}", b64(HEADER_JSON.as_bytes()), b64(&payload));
        let sig = self.sign(token.as_bytes());
        token.push('.');
        token.push_str(&b64(&sig));
        token
    }

    /// Verify a raw token and reconstruct the session identity.
    pub fn verify(&self, token: &str) -> Result<SessionIdentity, CredentialError> {
        self.verify_at(token, epoch_secs())
    }

    fn verify_at(&self, token: &str, now: u64) -> Result<SessionIdentity, CredentialError> {
        let mut parts = token.split('.');
        let (header, payload, sig) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(CredentialError::Invalid),
        };

        let signing_input = format!("{header}.{payload}");
        let expected = self.sign(signing_input.as_bytes());
        let presented = b64_decode(sig)?;
        if !constant_time_eq(&expected, &presented) {
            return Err(CredentialError::Invalid);
        }

        let claims: Claims = serde_json::from_slice(&b64_decode(payload)?)
            .map_err(|_| CredentialError::Invalid)?;
        if claims.exp <= now {
            return Err(CredentialError::Invalid);
        }

        Ok(SessionIdentity {
            user_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        })
    }

    /// Verify an `Authorization` header value. The scheme check is a split
    /// on the first space, case-sensitive; absence of any material is the
    /// one condition reported as `Missing`.
    pub fn verify_bearer(&self, header: Option<&str>) -> Result<SessionIdentity, CredentialError> {
        let raw = header.map(str::trim).filter(|v| !v.is_empty());
        let raw = raw.ok_or(CredentialError::Missing)?;
        match raw.split_once(' ') {
            Some(("Bearer", token)) => self.verify(token),
            _ => Err(CredentialError::Invalid),
        }
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can accept any key length");
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn b64_decode(data: &str) -> Result<Vec<u8>, CredentialError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|_| CredentialError::Invalid)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CredentialKey {
        CredentialKey::new(b"test-signing-secret", 3600)
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|r| (*r).to_string()).collect()
    }

    #[test]
    fn issued_credential_verifies_and_round_trips_claims() {
        let key = key();
        let token = key.issue(7, "milan@admin.com", &roles(&["admin", "user"]));

        let identity = key.verify(&token).unwrap();
        assert_eq!(identity.user_id, 7);
        assert_eq!(identity.email, "milan@admin.com");
        assert_eq!(identity.roles, roles(&["admin", "user"]));
    }

    #[test]
    fn expired_credential_is_rejected() {
        let key = key();
        let now = epoch_secs();
        let token = key.issue_at(1, "a@b.com", &roles(&["user"]), now - 7200);
        assert_eq!(key.verify_at(&token, now), Err(CredentialError::Invalid));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let key = key();
        let token = key.issue_at(1, "a@b.com", &roles(&[]), 1000);
        // exp = 1000 + 3600; a token is dead at its exact deadline
        assert!(key.verify_at(&token, 4599).is_ok());
        assert_eq!(key.verify_at(&token, 4600), Err(CredentialError::Invalid));
    }

    #[test]
    fn foreign_key_signature_is_rejected() {
        let token = key().issue(1, "a@b.com", &roles(&["admin"]));
        let other = CredentialKey::new(b"some-other-secret", 3600);
        assert_eq!(other.verify(&token), Err(CredentialError::Invalid));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let key = key();
        let token = key.issue(1, "a@b.com", &roles(&["user"]));

        // Splice in a forged payload claiming the admin role.
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = b64(br#"{"sub":1,"email":"a@b.com","roles":["admin"],"iat":0,"exp":99999999999}"#);
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(key.verify(&forged), Err(CredentialError::Invalid));
    }

    #[test]
    fn structurally_malformed_tokens_are_rejected() {
        let key = key();
        for garbage in ["", "abc", "a.b", "a.b.c.d", "!!.!!.!!"] {
            assert_eq!(key.verify(garbage), Err(CredentialError::Invalid), "{garbage:?}");
        }
    }

    #[test]
    fn bearer_extraction_distinguishes_missing_from_invalid() {
        let key = key();
        assert_eq!(
            key.verify_bearer(None),
            Err(CredentialError::Missing)
        );
        assert_eq!(
            key.verify_bearer(Some("")),
            Err(CredentialError::Missing)
        );
        assert_eq!(
            key.verify_bearer(Some("Basic dXNlcjpwdw==")),
            Err(CredentialError::Invalid)
        );
        // Scheme is case-sensitive.
        assert_eq!(
            key.verify_bearer(Some("bearer sometoken")),
            Err(CredentialError::Invalid)
        );
    }

    #[test]
    fn bearer_header_with_valid_token_verifies() {
        let key = key();
        let token = key.issue(3, "x@y.com", &roles(&["user"]));
        let identity = key.verify_bearer(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(identity.user_id, 3);
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
