//! Request description and the HTTP helper contract.

use async_trait::async_trait;
use reqwest::Method;
use sc_core::error::{ChatError, ChatResult};
use sc_core::token::AuthType;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Credentials attached to a request on behalf of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestAuth {
    /// Sent as the `Authorization` header.
    pub token: String,
    pub auth_type: AuthType,
    /// Socket connection the request belongs to, once one is established.
    pub connection_id: Option<String>,
}

/// One REST call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path starting with `/`, e.g. `/channels/messaging/general/query`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub base_url: String,
    pub api_key: String,
    pub auth: Option<RequestAuth>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            base_url: String::new(),
            api_key: String::new(),
            auth: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Fill in where and as whom the request is sent.
    pub fn with_context(
        mut self,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        auth: Option<RequestAuth>,
    ) -> Self {
        self.base_url = base_url.into();
        self.api_key = api_key.into();
        self.auth = auth;
        self
    }

    /// Full URL without query string.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }

    /// Query parameters including the ones every request carries.
    pub fn full_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.query.len() + 2);
        params.push(("api_key".to_string(), self.api_key.clone()));
        if let Some(conn) = self.auth.as_ref().and_then(|a| a.connection_id.as_ref()) {
            params.push(("connection_id".to_string(), conn.clone()));
        }
        params.extend(self.query.iter().cloned());
        params
    }

    /// GETs are safe to resend after a timeout.
    pub fn is_idempotent(&self) -> bool {
        self.method == Method::GET
    }
}

/// Sends authenticated requests and returns the parsed body.
///
/// Implementations attach the API key, connection id and auth headers from
/// the request, and turn non-2xx answers into `ChatError::Api` carrying the
/// original status and the server's code and message.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn send(&self, request: ApiRequest) -> ChatResult<Value>;
}

/// Decode a response body into a typed value.
pub fn decode<T: DeserializeOwned>(value: Value) -> ChatResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ChatError::Serialization(format!("failed to parse response: {e}")))
}
