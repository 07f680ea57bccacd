//! Stream Chat API - HTTP side of the chat client.
//!
//! The rest of the client talks to the server through one narrow contract,
//! [`Requester`]: hand it an [`ApiRequest`], get back the parsed JSON body
//! or a structured [`sc_core::ApiError`]. [`ApiClient`] is the reqwest
//! implementation; the `endpoints` modules build the requests for each
//! channel, user, search and location call, and `response` holds the typed
//! bodies they return.

pub mod client;
pub mod endpoints;
pub mod request;
pub mod response;

// Re-export key types
pub use client::{ApiClient, RetryConfig};
pub use request::{decode, ApiRequest, RequestAuth, Requester};
pub use reqwest::Method;
