//! Message search.

use serde::Serialize;
use serde_json::Value;

use sc_core::error::{ChatError, ChatResult};

use super::{to_payload_param, SortParam};
use crate::request::ApiRequest;

/// Payload of `GET /search`.
///
/// Exactly one of `query` (full text) and `message_filter_conditions`
/// must be set.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    pub filter_conditions: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_filter_conditions: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl SearchOptions {
    pub fn text(filter_conditions: Value, query: impl Into<String>) -> Self {
        Self {
            filter_conditions,
            query: Some(query.into()),
            message_filter_conditions: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

pub fn search(options: &SearchOptions) -> ChatResult<ApiRequest> {
    match (&options.query, &options.message_filter_conditions) {
        (Some(_), Some(_)) => {
            return Err(ChatError::InvalidInput(
                "search takes either a query or message filter conditions, not both".into(),
            ))
        }
        (None, None) => {
            return Err(ChatError::InvalidInput(
                "search needs a query or message filter conditions".into(),
            ))
        }
        _ => {}
    }
    Ok(ApiRequest::get("/search").query("payload", to_payload_param(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_text() {
        let req = search(&SearchOptions::text(
            serde_json::json!({"members": {"$in": ["alice"]}}),
            "lunch",
        ))
        .unwrap();
        assert_eq!(req.path, "/search");
        let payload: Value = serde_json::from_str(&req.query[0].1).unwrap();
        assert_eq!(payload["query"], "lunch");
    }

    #[test]
    fn test_search_requires_exactly_one_criterion() {
        let mut options = SearchOptions::text(serde_json::json!({}), "x");
        options.message_filter_conditions = Some(serde_json::json!({"pinned": true}));
        assert!(search(&options).unwrap_err().is_config());

        options.query = None;
        options.message_filter_conditions = None;
        assert!(search(&options).is_err());
    }
}
