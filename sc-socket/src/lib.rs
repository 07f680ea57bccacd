//! Stream Chat Socket - the real-time side of the chat client.
//!
//! This crate provides:
//! - A narrow transport abstraction (`Transport` / `Socket`) with a
//!   tokio-tungstenite implementation
//! - The stable connection manager: one logical session across any number
//!   of physical sockets, with handshake handling, exponential backoff and
//!   jitter, heartbeat pings, a health watchdog, and a recovery hook that
//!   runs before a reconnected session is declared healthy

pub mod manager;
pub mod state;
pub mod transport;

// Re-export key types
pub use manager::{
    build_connect_url, ConnectParams, ConnectionHandler, HealthCheckConfig, ReconnectConfig,
    StableConnection,
};
pub use state::{ConnectionOpen, ConnectionState};
pub use transport::{Socket, Transport, TransportEvent, TungsteniteTransport};
