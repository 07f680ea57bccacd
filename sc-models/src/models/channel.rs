//! Channel records returned by the channel endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::location::LiveLocation;
use super::member::{Member, ReadState};
use super::message::Message;
use super::user::User;

/// Channel-level attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub channel_type: String,
    #[serde(default)]
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full channel state as returned by query, watch and create calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: ChannelInfo,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub read: Vec<ReadState>,
    #[serde(default)]
    pub watchers: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_count: Option<u64>,
    #[serde(default)]
    pub active_live_locations: Vec<LiveLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults() {
        let snap: ChannelSnapshot = serde_json::from_value(serde_json::json!({
            "channel": {"id": "general", "type": "messaging", "cid": "messaging:general", "color": "red"}
        }))
        .unwrap();
        assert_eq!(snap.channel.cid, "messaging:general");
        assert_eq!(snap.channel.extra["color"], "red");
        assert!(snap.messages.is_empty());
        assert!(snap.active_live_locations.is_empty());
    }
}
