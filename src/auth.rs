//! Identity tokens carried in the `auth_token` header.
//!
//! A token is `base64url(claims-json) "." base64url(hmac-sha256(claims-json))`.
//! The claims name the user record the bearer acts as and, optionally, when
//! the token stops being accepted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::eid::Eid;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length accepted for signing.
const MIN_SECRET_LEN: usize = 16;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("signing secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("token is malformed")]
    Malformed,

    #[error("token signature does not match")]
    BadSignature,

    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Eid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Option<chrono::Duration>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenSigner {{ secret: [REDUCTED], ttl: {:?} }}", self.ttl)
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Option<chrono::Duration>) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }

        Ok(Self {
            secret: secret.to_vec(),
            ttl,
        })
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts keys of any length")
    }

    pub fn issue(&self, subject: &Eid) -> String {
        let claims = Claims {
            sub: subject.clone(),
            exp: self
                .ttl
                .map(|ttl| (chrono::Utc::now() + ttl).timestamp()),
        };

        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims).expect("claims always serialize"),
        );

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{payload}.{signature}")
    }

    /// Checks the signature in constant time, then the expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(TokenError::Malformed)?;

        if let Some(exp) = claims.exp {
            if chrono::Utc::now().timestamp() >= exp {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }
}

/// Extracts the bearer token from an Authorization header value.
///
/// Expected format: "Bearer <token>"
/// Returns `None` if the header doesn't match the expected format.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    // Case-insensitive "Bearer " prefix check (RFC 6750 allows case-insensitive)
    if header.len() < 7 {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_issue_and_verify() {
        let signer = TokenSigner::new(SECRET, None).unwrap();
        let user = Eid::new();

        let token = signer.issue(&user);
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.exp, None);
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert_eq!(
            TokenSigner::new(b"short", None).unwrap_err(),
            TokenError::WeakSecret
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = TokenSigner::new(SECRET, None).unwrap();
        let token = signer.issue(&Eid::new());

        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: Eid::new(),
                exp: None,
            })
            .unwrap(),
        );
        let forged = format!("{forged_claims}.{signature}");

        assert_eq!(signer.verify(&forged).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_other_secret_rejected() {
        let signer = TokenSigner::new(SECRET, None).unwrap();
        let other = TokenSigner::new(b"another-secret-another-secret", None).unwrap();

        let token = other.issue(&Eid::new());
        assert_eq!(signer.verify(&token).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = TokenSigner::new(SECRET, Some(chrono::Duration::seconds(-5))).unwrap();
        let token = signer.issue(&Eid::new());
        assert_eq!(signer.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_malformed_token_rejected() {
        let signer = TokenSigner::new(SECRET, None).unwrap();
        assert_eq!(signer.verify("").unwrap_err(), TokenError::Malformed);
        assert_eq!(signer.verify("no-dot-here").unwrap_err(), TokenError::Malformed);
        assert_eq!(signer.verify("abc.!!!").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        assert_eq!(extract_bearer_token("Bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("  Bearer secret123  "), Some("secret123"));
    }

    #[test]
    fn test_extract_bearer_token_invalid() {
        assert_eq!(extract_bearer_token(""), None);
        assert_eq!(extract_bearer_token("Basic secret123"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearersecret123"), None);
    }
}
