//! Typed response bodies.
//!
//! Channel calls return [`ChannelSnapshot`] directly; everything else is
//! wrapped in one of the small envelopes below. All of them tolerate extra
//! fields such as `duration`.

use serde::{Deserialize, Serialize};

use sc_models::{ChannelSnapshot, Event, LiveLocation, Message, User};

/// `POST /channels`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryChannelsResponse {
    #[serde(default)]
    pub channels: Vec<ChannelSnapshot>,
}

/// `POST /channels/{type}/{id}/message`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Message,
}

/// `GET /users`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersResponse {
    #[serde(default)]
    pub users: Vec<User>,
}

/// One hit of `GET /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub message: Message,
}

/// `GET /search`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// `POST /channels/{type}/{id}/event` and `/read`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

/// `POST /guest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestResponse {
    pub user: User,
    pub access_token: String,
}

/// `PUT /users/live_locations` answers with the stored record.
pub type LiveLocationResponse = LiveLocation;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::decode;

    #[test]
    fn test_query_channels_response() {
        let resp: QueryChannelsResponse = decode(serde_json::json!({
            "channels": [{"channel": {"id": "a", "type": "messaging", "cid": "messaging:a"}}],
            "duration": "1.2ms"
        }))
        .unwrap();
        assert_eq!(resp.channels.len(), 1);
        assert_eq!(resp.channels[0].channel.cid, "messaging:a");
    }

    #[test]
    fn test_search_response() {
        let resp: SearchResponse = decode(serde_json::json!({
            "results": [{"message": {"id": "m1", "text": "found"}}]
        }))
        .unwrap();
        assert_eq!(resp.results[0].message.text, "found");
        assert!(resp.next.is_none());
    }
}
