use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use jwt::VerifyWithKey;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::AuthError;
use crate::models::AuthContext;

/// Subject as issued by the identity service: a numeric user id, or a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Subject {
    Id(u64),
    Name(String),
}

impl Subject {
    fn into_string(self) -> String {
        match self {
            Subject::Id(id) => id.to_string(),
            Subject::Name(name) => name,
        }
    }
}

/// Claims carried by identity-service tokens
#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    sub: Subject,
    username: String,
    email: String,
    #[serde(default)]
    iat: Option<u64>,
    exp: u64,
}

/// Validate an HS256 bearer token against `secret` at the current time
pub fn validate_token(secret: &str, token: &str) -> Result<AuthContext, AuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    validate_token_at(secret, token, now)
}

/// Validate a token as of `now` (Unix seconds). A token whose `exp` is not
/// strictly after `now` is expired.
pub fn validate_token_at(secret: &str, token: &str, now: u64) -> Result<AuthContext, AuthError> {
    let key: Hmac<Sha256> =
        Hmac::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSignature)?;

    let claims: TokenClaims = token.verify_with_key(&key).map_err(|err| match err {
        // a MAC mismatch surfaces from the hmac verifier, not as InvalidSignature
        jwt::Error::InvalidSignature | jwt::Error::RustCryptoMac(_) => AuthError::InvalidSignature,
        _ => AuthError::TokenMalformed,
    })?;

    if claims.exp <= now {
        return Err(AuthError::TokenExpired);
    }

    Ok(AuthContext {
        subject_id: claims.sub.into_string(),
        username: claims.username,
        email: claims.email,
        issued_at: claims.iat,
        expires_at: claims.exp,
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
