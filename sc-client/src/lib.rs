//! Stream Chat Client - the object applications hold.
//!
//! [`ChatClient`] owns the session: the stable connection, the process-wide
//! user cache, every [`Channel`] handle and its [`ChannelState`] mirror, and
//! the listener registry. Inbound events flow
//! connection -> [`EventDispatcher`] -> caches -> listeners, strictly in
//! arrival order.

pub mod channel;
pub mod channel_state;
pub mod client;
pub mod dispatcher;
pub mod listeners;
pub mod state;

// Re-export key types
pub use channel::Channel;
pub use channel_state::{ChannelState, TypingEntry};
pub use client::ChatClient;
pub use dispatcher::EventDispatcher;
pub use listeners::{Listener, ListenerScope, Listeners};
pub use state::ClientState;

pub use sc_api::endpoints::channels::{ChannelQuery, MessagePayload, QueryChannelsOptions};
pub use sc_api::endpoints::search::SearchOptions;
pub use sc_api::endpoints::users::QueryUsersOptions;
pub use sc_api::endpoints::SortParam;
pub use sc_socket::{ConnectionOpen, ConnectionState};
