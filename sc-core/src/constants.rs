//! Client-wide constants.

/// Client version.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default REST base URL of the hosted chat service.
pub const DEFAULT_BASE_URL: &str = "https://chat.stream-io-api.com";

/// Separator between channel type and id in a composite channel identifier.
pub const CID_SEPARATOR: char = ':';

/// Default HTTP request timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Interval after the last server health check before the client pings.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;

/// Extra silence tolerated on top of the ping interval before the socket is
/// considered dead.
pub const DEFAULT_HEALTH_GRACE_MS: u64 = 10_000;

/// Maximum time to wait for the handshake frame after the socket opens.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 15_000;

/// How long an outage must last before listeners see `connection.changed`
/// with `online: false`.
pub const DEFAULT_OFFLINE_GRACE_MS: u64 = 5_000;

/// Upper bound on the encoded `json` query parameter of the connect URL.
pub const MAX_HANDSHAKE_QUERY_LEN: usize = 1_900;

/// Reconnect backoff floor in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 250;

/// Reconnect backoff cap in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 25_000;

/// Number of channels re-queried per request during recovery.
pub const DEFAULT_RECOVERY_CHANNEL_LIMIT: usize = 30;

/// Tick of the periodic channel clean-up.
pub const DEFAULT_CLEAN_INTERVAL_MS: u64 = 500;

/// Typing indicators without a stop event expire after this long.
pub const DEFAULT_TYPING_TIMEOUT_MS: u64 = 7_000;

/// Capacity of the broadcast channel behind `subscribe()`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Server and socket codes the client reacts to.
pub mod codes {
    /// The server rejected the token because it expired.
    pub const TOKEN_EXPIRED: i64 = 40;
    /// Normal WebSocket closure.
    pub const WS_CLOSED_SUCCESS: u16 = 1000;
}

/// Well-known event type names.
pub mod events {
    pub const HEALTH_CHECK: &str = "health.check";
    pub const CONNECTION_OK: &str = "connection.ok";
    pub const CONNECTION_CHANGED: &str = "connection.changed";
    pub const CONNECTION_RECOVERED: &str = "connection.recovered";
}

/// User agent sent with every request and the socket handshake.
pub fn user_agent() -> String {
    format!(
        "stream-chat-rust-client-{CLIENT_VERSION}-{}",
        crate::platform::Platform::current().name().to_lowercase()
    )
}
