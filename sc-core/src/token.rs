//! Auth token helpers.
//!
//! Server identities sign HS256 JWTs with the API secret; end users bring
//! their own token (or a development token when the app allows it). The
//! handshake only needs to know which token to attach and which user the
//! token claims to be, so that is all this module covers.

use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// How the connection authenticates, sent as `stream-auth-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Jwt,
    Anonymous,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jwt => "jwt",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a user token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Serialize)]
struct ServerClaims {
    server: bool,
}

/// Sign a user token with the API secret.
///
/// `exp` and `iat` are unix timestamps in seconds.
pub fn create_user_token(
    secret: &str,
    user_id: &str,
    exp: Option<i64>,
    iat: Option<i64>,
) -> ChatResult<String> {
    if user_id.is_empty() {
        return Err(ChatError::InvalidInput("user_id is required to sign a token".into()));
    }
    let claims = UserClaims {
        user_id: user_id.to_string(),
        exp,
        iat,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Token(format!("failed to sign user token: {e}")))
}

/// Sign the token a server identity presents on its own behalf.
pub fn server_token(secret: &str) -> ChatResult<String> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &ServerClaims { server: true },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Token(format!("failed to sign server token: {e}")))
}

/// Build an unsigned development token. Only accepted by apps with auth
/// checks disabled.
pub fn dev_token(user_id: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({ "user_id": user_id }).to_string());
    format!("{header}.{payload}.devtoken")
}

/// Extract the `user_id` claim without verifying the signature.
///
/// Returns `None` for anything that is not a three-part token with a JSON
/// payload carrying a string `user_id`.
pub fn user_id_from_token(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    // Accept both base64url and padded standard base64 payloads.
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("user_id")?.as_str().map(String::from)
}

/// Verify a user token against the API secret and return its claims.
pub fn verify_user_token(secret: &str, token: &str) -> ChatResult<UserClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = HashSet::new();
    jsonwebtoken::decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| ChatError::Token(format!("invalid user token: {e}")))
}
