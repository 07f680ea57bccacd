//! Stream Chat Models - typed records exchanged with the chat API.
//!
//! Everything here is plain serde data: users, messages, members, read
//! markers, live locations, channel snapshots, the composite channel
//! identifier, and the tagged event record delivered over the socket.
//! Unknown server fields are preserved in `extra` maps so nothing is lost
//! when the server adds attributes.

pub mod cid;
pub mod event;
pub mod models;

// Re-export key types
pub use cid::Cid;
pub use event::{Event, EventType};
pub use models::channel::{ChannelInfo, ChannelSnapshot};
pub use models::location::{validate_coordinates, LiveLocation};
pub use models::member::{Member, ReadState};
pub use models::message::Message;
pub use models::user::User;
