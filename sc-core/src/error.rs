//! Unified error types for the Stream Chat client.
//!
//! Every failure the client can surface is folded into the single `ChatError`
//! enum. Variants are grouped by how callers are expected to react: local
//! configuration mistakes, server/application rejections, and transport
//! failures (which the connection manager retries on its own).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience type alias for Results using ChatError.
pub type ChatResult<T> = Result<T, ChatError>;

/// Structured error returned by the chat API for non-2xx responses.
///
/// Mirrors the server's error body:
/// ```json
/// { "code": 4, "message": "...", "StatusCode": 400, "more_info": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status code of the response.
    #[serde(rename = "StatusCode", default)]
    pub status: u16,
    /// Server-defined error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message from the server.
    #[serde(default)]
    pub message: String,
    /// Link to documentation for this error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_info: Option<String>,
}

impl ApiError {
    /// Build an error for a response whose body could not be decoded.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self {
            status,
            code: 0,
            message: if body.is_empty() {
                format!("request failed with status {status}")
            } else {
                body.to_string()
            },
            more_info: None,
        }
    }

    /// Whether the server rejected the credentials (401/403).
    pub fn is_auth(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    /// Whether the server reported an expired token.
    pub fn is_token_expired(&self) -> bool {
        self.code == crate::constants::codes::TOKEN_EXPIRED
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chat error code {} (status {}): {}",
            self.code, self.status, self.message
        )
    }
}

/// Unified error type covering all error categories of the client.
#[derive(Error, Debug)]
pub enum ChatError {
    // -- Configuration errors (caller bugs, never retried) --
    /// Invalid or conflicting configuration / session usage.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A request argument failed local validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -- Server/application errors --
    /// The API answered with a non-2xx status.
    #[error("{0}")]
    Api(ApiError),

    // -- Network errors --
    /// HTTP request failed before a response was received.
    #[error("http error: {0}")]
    Http(String),

    /// Request or handshake timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// WebSocket transport error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The session was disconnected while the operation was pending.
    #[error("client disconnected")]
    Disconnected,

    // -- Local errors --
    /// Token signing or decoding failed.
    #[error("token error: {0}")]
    Token(String),

    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether this is a local configuration or validation failure.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingConfig(_) | Self::InvalidInput(_)
        )
    }

    /// Whether the failure is a transient transport problem worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Socket(_))
    }

    /// HTTP-equivalent status for errors that have one.
    ///
    /// Local input validation reports 400 so callers can treat it the same
    /// way as a server-side rejection of the same request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            Self::InvalidInput(_) => Some(400),
            _ => None,
        }
    }
}

/// Connection failures are handed to every waiter of the same connect
/// attempt, so the error has to be duplicable. `Io` keeps kind and message.
impl Clone for ChatError {
    fn clone(&self) -> Self {
        match self {
            Self::Config(s) => Self::Config(s.clone()),
            Self::MissingConfig(s) => Self::MissingConfig(s.clone()),
            Self::InvalidInput(s) => Self::InvalidInput(s.clone()),
            Self::Api(e) => Self::Api(e.clone()),
            Self::Http(s) => Self::Http(s.clone()),
            Self::Timeout(s) => Self::Timeout(s.clone()),
            Self::Socket(s) => Self::Socket(s.clone()),
            Self::Disconnected => Self::Disconnected,
            Self::Token(s) => Self::Token(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Serialization(s) => Self::Serialization(s.clone()),
            Self::Internal(s) => Self::Internal(s.clone()),
        }
    }
}

impl From<ApiError> for ChatError {
    fn from(e: ApiError) -> Self {
        ChatError::Api(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(e: toml::de::Error) -> Self {
        ChatError::Config(e.to_string())
    }
}
