//! Connection lifecycle types.

use sc_core::error::{ChatError, ChatResult};
use sc_models::{Event, User};

/// Lifecycle of a logical connection.
///
/// `Idle -> Connecting -> Connected -> (Recovering -> Connected)* -> Closing -> Closed`.
/// Failures before the first successful handshake keep the connection in
/// `Connecting`; a rejected first handshake ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect()` not called yet.
    Idle,
    /// Working towards the first successful handshake.
    Connecting,
    /// Handshake done, events flowing.
    Connected,
    /// Lost a previously healthy socket; reconnecting and resyncing.
    Recovering,
    /// `disconnect()` in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether the session is still trying to be (or is) online.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Recovering)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Recovering => write!(f, "recovering"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// The server's answer to a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOpen {
    /// Server-assigned id of this physical connection.
    pub connection_id: String,
    /// The authenticated user as the server sees it.
    pub me: Option<User>,
    /// The raw `connection.ok` event.
    pub event: Event,
}

impl ConnectionOpen {
    /// Interpret the first frame of a socket.
    ///
    /// An `error` object in the frame is the server refusing the handshake;
    /// it becomes `ChatError::Api` carrying the server's status and code.
    pub fn from_handshake(text: &str) -> ChatResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ChatError::Serialization(format!("malformed handshake frame: {e}")))?;

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            let api_error: sc_core::ApiError = serde_json::from_value(err.clone())
                .map_err(|e| ChatError::Serialization(format!("malformed handshake error: {e}")))?;
            return Err(ChatError::Api(api_error));
        }

        let event: Event = serde_json::from_value(value)
            .map_err(|e| ChatError::Serialization(format!("malformed handshake frame: {e}")))?;
        let connection_id = event
            .connection_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChatError::Serialization("handshake frame has no connection_id".into()))?;

        Ok(Self {
            connection_id,
            me: event.me.clone(),
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_models::EventType;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Recovering.to_string(), "recovering");
        assert!(ConnectionState::Recovering.is_active());
        assert!(!ConnectionState::Closed.is_active());
    }

    #[test]
    fn test_handshake_ok() {
        let open = ConnectionOpen::from_handshake(
            r#"{"type":"connection.ok","connection_id":"c-1","me":{"id":"alice"}}"#,
        )
        .unwrap();
        assert_eq!(open.connection_id, "c-1");
        assert_eq!(open.me.unwrap().id, "alice");
        assert_eq!(open.event.kind, EventType::ConnectionOk);
    }

    #[test]
    fn test_handshake_error_frame() {
        let err = ConnectionOpen::from_handshake(
            r#"{"error":{"code":40,"message":"token expired","StatusCode":401}}"#,
        )
        .unwrap_err();
        match err {
            ChatError::Api(e) => {
                assert_eq!(e.status, 401);
                assert!(e.is_token_expired());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_handshake_without_connection_id() {
        assert!(matches!(
            ConnectionOpen::from_handshake(r#"{"type":"connection.ok"}"#),
            Err(ChatError::Serialization(_))
        ));
        assert!(ConnectionOpen::from_handshake("<html>").is_err());
    }
}
