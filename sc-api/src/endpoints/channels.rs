//! Channel endpoints.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use sc_core::error::ChatResult;
use sc_models::Cid;

use super::{to_body, SortParam};
use crate::request::ApiRequest;

/// Message pagination for channel queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessagePagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_lt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_gt: Option<String>,
}

/// Body of `POST /channels/{type}/{id}/query`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelQuery {
    pub state: bool,
    pub watch: bool,
    pub presence: bool,
    /// Channel data used when the call creates the channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<MessagePagination>,
}

impl Default for ChannelQuery {
    fn default() -> Self {
        Self {
            state: true,
            watch: true,
            presence: false,
            data: None,
            messages: None,
        }
    }
}

/// Body of `POST /channels`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryChannelsOptions {
    pub filter_conditions: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortParam>,
    pub state: bool,
    pub watch: bool,
    pub presence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_limit: Option<u32>,
    /// Newest known message per cid, so the server can tell what was missed.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub last_message_ids: HashMap<String, String>,
}

impl QueryChannelsOptions {
    pub fn new(filter_conditions: Value) -> Self {
        Self {
            filter_conditions,
            sort: Vec::new(),
            state: true,
            watch: true,
            presence: false,
            limit: None,
            offset: None,
            message_limit: None,
            last_message_ids: HashMap::new(),
        }
    }
}

/// Outgoing message body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub show_in_channel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_location: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

fn channel_path(cid: &Cid, action: &str) -> String {
    format!("/channels/{}/{}/{}", cid.channel_type(), cid.id(), action)
}

/// Get-or-create a channel and optionally start watching it.
pub fn query(cid: &Cid, query: &ChannelQuery) -> ChatResult<ApiRequest> {
    Ok(ApiRequest::post(channel_path(cid, "query")).json(to_body(query)?))
}

/// Query several channels at once.
pub fn query_channels(options: &QueryChannelsOptions) -> ChatResult<ApiRequest> {
    Ok(ApiRequest::post("/channels").json(to_body(options)?))
}

pub fn stop_watching(cid: &Cid) -> ApiRequest {
    ApiRequest::post(channel_path(cid, "stop-watching")).json(serde_json::json!({}))
}

pub fn send_message(cid: &Cid, message: &MessagePayload) -> ChatResult<ApiRequest> {
    Ok(ApiRequest::post(channel_path(cid, "message"))
        .json(serde_json::json!({ "message": to_body(message)? })))
}

/// Mark the channel read, optionally up to a given message.
pub fn mark_read(cid: &Cid, message_id: Option<&str>) -> ApiRequest {
    let body = match message_id {
        Some(id) => serde_json::json!({ "message_id": id }),
        None => serde_json::json!({}),
    };
    ApiRequest::post(channel_path(cid, "read")).json(body)
}

/// Send a custom or typing event to the channel.
pub fn send_event(cid: &Cid, event: Value) -> ApiRequest {
    ApiRequest::post(channel_path(cid, "event")).json(serde_json::json!({ "event": event }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn cid() -> Cid {
        Cid::new("messaging", "general").unwrap()
    }

    #[test]
    fn test_query_request() {
        let req = query(&cid(), &ChannelQuery::default()).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/channels/messaging/general/query");
        let body = req.body.unwrap();
        assert_eq!(body["state"], true);
        assert_eq!(body["watch"], true);
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_query_channels_body() {
        let mut options = QueryChannelsOptions::new(serde_json::json!({"cid": {"$in": ["messaging:general"]}}));
        options.sort.push(SortParam::desc("last_message_at"));
        options.limit = Some(30);
        options
            .last_message_ids
            .insert("messaging:general".into(), "m9".into());
        let body = query_channels(&options).unwrap().body.unwrap();
        assert_eq!(body["filter_conditions"]["cid"]["$in"][0], "messaging:general");
        assert_eq!(body["sort"][0]["direction"], -1);
        assert_eq!(body["limit"], 30);
        assert_eq!(body["last_message_ids"]["messaging:general"], "m9");
    }

    #[test]
    fn test_send_message_wraps_payload() {
        let req = send_message(&cid(), &MessagePayload::text("hello")).unwrap();
        assert_eq!(req.path, "/channels/messaging/general/message");
        let body = req.body.unwrap();
        assert_eq!(body["message"]["text"], "hello");
        assert!(body["message"].get("show_in_channel").is_none());
    }

    #[test]
    fn test_mark_read_and_event() {
        assert_eq!(
            mark_read(&cid(), Some("m1")).body.unwrap()["message_id"],
            "m1"
        );
        let req = send_event(&cid(), serde_json::json!({"type": "typing.start"}));
        assert_eq!(req.path, "/channels/messaging/general/event");
        assert_eq!(req.body.unwrap()["event"]["type"], "typing.start");
    }
}
