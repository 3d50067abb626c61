//! HS256 bearer tokens for the `/api` surface.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Tokens stay valid for three days after issuance.
pub const TOKEN_TTL_SECS: i64 = 3 * 24 * 60 * 60;

const TOKEN_ALGORITHM: &str = "HS256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("signing key rejected: {0}")]
    Key(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: String,
}

#[derive(Debug, Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { secret: secret.as_ref().to_vec() }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|err| AuthError::Key(err.to_string()))
    }

    /// Issue a token for `email` under a freshly generated subject id.
    ///
    /// # Errors
    /// Returns [`AuthError::Key`] when the secret is unusable.
    pub fn issue(&self, email: &str, now_secs: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: email.to_string(),
            iat: now_secs,
            exp: now_secs + TOKEN_TTL_SECS,
        };
        let header = Header { alg: TOKEN_ALGORITHM.to_string(), typ: "JWT".to_string() };

        let header = serde_json::to_vec(&header).map_err(|_| AuthError::Malformed)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| AuthError::Malformed)?;
        let signing_input =
            format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// # Errors
    /// Returns an [`AuthError`] for a malformed, forged, or expired token.
    pub fn verify(&self, token: &str, now_secs: i64) -> Result<Claims, AuthError> {
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return Err(AuthError::Malformed);
        };
        let mut parts = signing_input.split('.');
        let (Some(header), Some(payload), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AuthError::Malformed);
        };

        let header: Header = decode_segment(header)?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| AuthError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_segment(payload)?;
        if claims.exp <= now_secs {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

#[must_use]
pub fn now_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Token from an `Authorization` value; the scheme name is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Reject requests without a valid `Authorization: Bearer` token.
///
/// Verified claims are placed in the request extensions.
pub async fn require_bearer(
    State(signer): State<Arc<TokenSigner>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;

    let claims = signer.verify(token, now_secs())?;
    tracing::debug!(sub = %claims.sub, "bearer token accepted");
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_matched_case_insensitively() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("BEARER  abc.def.ghi "), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc.def.ghi"), None);
    }

    const NOW: i64 = 1_740_000_000;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    #[test]
    fn issued_token_verifies_with_expected_claims() {
        let token = signer()
            .issue("usuario@ejemplo.com", NOW)
            .unwrap_or_else(|err| panic!("issue failed: {err}"));
        let claims =
            signer().verify(&token, NOW + 60).unwrap_or_else(|err| panic!("verify failed: {err}"));

        assert_eq!(claims.email, "usuario@ejemplo.com");
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.exp, NOW + TOKEN_TTL_SECS);
        assert!(Uuid::parse_str(&claims.sub).is_ok());
    }

    #[test]
    fn each_token_gets_a_fresh_subject() {
        let a = signer().issue("a@b.co", NOW).unwrap_or_else(|err| panic!("{err}"));
        let b = signer().issue("a@b.co", NOW).unwrap_or_else(|err| panic!("{err}"));
        let sub = |token: &str| {
            signer().verify(token, NOW).unwrap_or_else(|err| panic!("{err}")).sub
        };
        assert_ne!(sub(&a), sub(&b));
    }

    #[test]
    fn token_expires_after_three_days() {
        let token = signer().issue("a@b.co", NOW).unwrap_or_else(|err| panic!("{err}"));
        assert!(signer().verify(&token, NOW + TOKEN_TTL_SECS - 1).is_ok());
        assert_eq!(signer().verify(&token, NOW + TOKEN_TTL_SECS), Err(AuthError::Expired));
    }

    #[test]
    fn other_secret_or_tampered_payload_is_rejected() {
        let token = signer().issue("a@b.co", NOW).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(TokenSigner::new("other").verify(&token, NOW), Err(AuthError::BadSignature));

        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"x","email":"evil@b.co","iat":1740000000,"exp":9999999999}"#,
        );
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged;
        assert_eq!(signer().verify(&parts.join("."), NOW), Err(AuthError::BadSignature));
    }

    #[test]
    fn foreign_algorithm_and_garbage_are_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"x","email":"a@b.co","iat":0,"exp":1}"#);
        assert_eq!(
            signer().verify(&format!("{header}.{payload}."), NOW),
            Err(AuthError::UnsupportedAlgorithm("none".to_string()))
        );
        assert_eq!(signer().verify("not-a-token", NOW), Err(AuthError::Malformed));
        assert_eq!(signer().verify("a.b.c.d", NOW), Err(AuthError::Malformed));
    }
}
