//! User endpoints.

use serde::Serialize;
use serde_json::Value;

use sc_core::error::ChatResult;
use sc_models::User;

use super::{to_payload_param, SortParam};
use crate::request::ApiRequest;

/// Payload of `GET /users`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryUsersOptions {
    pub filter_conditions: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortParam>,
    pub presence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl QueryUsersOptions {
    pub fn new(filter_conditions: Value) -> Self {
        Self {
            filter_conditions,
            sort: Vec::new(),
            presence: false,
            limit: None,
            offset: None,
        }
    }
}

pub fn query_users(options: &QueryUsersOptions) -> ChatResult<ApiRequest> {
    Ok(ApiRequest::get("/users").query("payload", to_payload_param(options)?))
}

/// Create a guest user; the response carries its access token.
pub fn guest(user: &User) -> ChatResult<ApiRequest> {
    Ok(ApiRequest::post("/guest").json(serde_json::json!({ "user": super::to_body(user)? })))
}
