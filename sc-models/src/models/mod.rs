//! Entity models.

pub mod channel;
pub mod location;
pub mod member;
pub mod message;
pub mod user;
