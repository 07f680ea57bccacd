//! Stream Chat Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other client crates:
//! - Client configuration (API key, base URLs, connection tuning)
//! - Unified error type covering configuration, API, and transport failures
//! - Structured logging with tracing
//! - Auth token helpers (server-signed, user, and development tokens)
//! - Platform detection utilities and common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;
pub mod token;

// Re-export commonly used items at the crate root
pub use config::{ClientConfig, ConfigHandle};
pub use error::{ApiError, ChatError, ChatResult};
pub use logging::init_logging;
pub use platform::Platform;
pub use token::AuthType;
