//! Socket event types and the event record.
//!
//! Every frame the server pushes is a JSON object with a `type` tag. Known
//! tags map to [`EventType`] variants; anything else is carried as
//! [`EventType::Unknown`] so new server events still reach listeners.

use chrono::{DateTime, Utc};
use sc_core::constants::CID_SEPARATOR;
use sc_core::error::{ChatError, ChatResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::channel::ChannelInfo;
use crate::models::location::LiveLocation;
use crate::models::member::Member;
use crate::models::message::Message;
use crate::models::user::User;

/// Event type discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Server heartbeat (`health.check`).
    HealthCheck,
    /// Handshake acknowledgement (`connection.ok`).
    ConnectionOk,
    /// Client-side online/offline transition (`connection.changed`).
    ConnectionChanged,
    /// Client-side recovery finished (`connection.recovered`).
    ConnectionRecovered,
    MessageNew,
    MessageUpdated,
    MessageDeleted,
    MessageRead,
    TypingStart,
    TypingStop,
    MemberAdded,
    MemberUpdated,
    MemberRemoved,
    UserPresenceChanged,
    UserUpdated,
    UserDeleted,
    UserWatchingStart,
    UserWatchingStop,
    ChannelUpdated,
    ChannelDeleted,
    ChannelTruncated,
    ChannelHidden,
    ChannelVisible,
    NotificationMessageNew,
    NotificationAddedToChannel,
    NotificationRemovedFromChannel,
    NotificationChannelDeleted,
    NotificationMarkRead,
    NotificationMutesUpdated,
    NotificationChannelMutesUpdated,
    /// A user began sharing a live location (`live_location.started`).
    LiveLocationStarted,
    LiveLocationUpdated,
    LiveLocationStopped,
    /// Unknown/unhandled event type.
    Unknown(String),
}

impl EventType {
    /// Parse an event type string from the server.
    pub fn from_str(s: &str) -> Self {
        match s {
            "health.check" => Self::HealthCheck,
            "connection.ok" => Self::ConnectionOk,
            "connection.changed" => Self::ConnectionChanged,
            "connection.recovered" => Self::ConnectionRecovered,
            "message.new" => Self::MessageNew,
            "message.updated" => Self::MessageUpdated,
            "message.deleted" => Self::MessageDeleted,
            "message.read" => Self::MessageRead,
            "typing.start" => Self::TypingStart,
            "typing.stop" => Self::TypingStop,
            "member.added" => Self::MemberAdded,
            "member.updated" => Self::MemberUpdated,
            "member.removed" => Self::MemberRemoved,
            "user.presence.changed" => Self::UserPresenceChanged,
            "user.updated" => Self::UserUpdated,
            "user.deleted" => Self::UserDeleted,
            "user.watching.start" => Self::UserWatchingStart,
            "user.watching.stop" => Self::UserWatchingStop,
            "channel.updated" => Self::ChannelUpdated,
            "channel.deleted" => Self::ChannelDeleted,
            "channel.truncated" => Self::ChannelTruncated,
            "channel.hidden" => Self::ChannelHidden,
            "channel.visible" => Self::ChannelVisible,
            "notification.message_new" => Self::NotificationMessageNew,
            "notification.added_to_channel" => Self::NotificationAddedToChannel,
            "notification.removed_from_channel" => Self::NotificationRemovedFromChannel,
            "notification.channel_deleted" => Self::NotificationChannelDeleted,
            "notification.mark_read" => Self::NotificationMarkRead,
            "notification.mutes_updated" => Self::NotificationMutesUpdated,
            "notification.channel_mutes_updated" => Self::NotificationChannelMutesUpdated,
            "live_location.started" => Self::LiveLocationStarted,
            "live_location.updated" => Self::LiveLocationUpdated,
            "live_location.stopped" => Self::LiveLocationStopped,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the server event string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::HealthCheck => "health.check",
            Self::ConnectionOk => "connection.ok",
            Self::ConnectionChanged => "connection.changed",
            Self::ConnectionRecovered => "connection.recovered",
            Self::MessageNew => "message.new",
            Self::MessageUpdated => "message.updated",
            Self::MessageDeleted => "message.deleted",
            Self::MessageRead => "message.read",
            Self::TypingStart => "typing.start",
            Self::TypingStop => "typing.stop",
            Self::MemberAdded => "member.added",
            Self::MemberUpdated => "member.updated",
            Self::MemberRemoved => "member.removed",
            Self::UserPresenceChanged => "user.presence.changed",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::UserWatchingStart => "user.watching.start",
            Self::UserWatchingStop => "user.watching.stop",
            Self::ChannelUpdated => "channel.updated",
            Self::ChannelDeleted => "channel.deleted",
            Self::ChannelTruncated => "channel.truncated",
            Self::ChannelHidden => "channel.hidden",
            Self::ChannelVisible => "channel.visible",
            Self::NotificationMessageNew => "notification.message_new",
            Self::NotificationAddedToChannel => "notification.added_to_channel",
            Self::NotificationRemovedFromChannel => "notification.removed_from_channel",
            Self::NotificationChannelDeleted => "notification.channel_deleted",
            Self::NotificationMarkRead => "notification.mark_read",
            Self::NotificationMutesUpdated => "notification.mutes_updated",
            Self::NotificationChannelMutesUpdated => "notification.channel_mutes_updated",
            Self::LiveLocationStarted => "live_location.started",
            Self::LiveLocationUpdated => "live_location.updated",
            Self::LiveLocationStopped => "live_location.stopped",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Heartbeat-class events: they carry the session's own user.
    pub fn is_health_event(&self) -> bool {
        matches!(self, Self::HealthCheck | Self::ConnectionOk)
    }

    /// Events that change a user record visible across channels.
    pub fn is_user_event(&self) -> bool {
        matches!(
            self,
            Self::UserPresenceChanged | Self::UserUpdated | Self::UserDeleted
        )
    }

    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            Self::MessageNew | Self::MessageUpdated | Self::MessageDeleted
        )
    }

    pub fn is_live_location_event(&self) -> bool {
        matches!(
            self,
            Self::LiveLocationStarted | Self::LiveLocationUpdated | Self::LiveLocationStopped
        )
    }

    /// Events synthesized by the client rather than sent by the server.
    pub fn is_client_side(&self) -> bool {
        matches!(self, Self::ConnectionChanged | Self::ConnectionRecovered)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::from_str(&s)
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event pushed by the server (or synthesized by the client).
///
/// Well-known payload fields are typed; every other field is kept in
/// `extra`. Dispatch only reads events, it never rewrites them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_location: Option<LiveLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Local receive time; set by [`Event::parse`] and the client constructors.
    #[serde(skip)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// An empty event of the given type, stamped with the current time.
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            cid: None,
            channel_type: None,
            channel_id: None,
            user: None,
            me: None,
            message: None,
            member: None,
            channel: None,
            live_location: None,
            connection_id: None,
            watcher_count: None,
            online: None,
            hard_delete: None,
            created_at: None,
            received_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    /// Decode one socket frame.
    ///
    /// Any JSON object with a string `type` becomes an event. Payload fields
    /// that do not fit their typed slot are kept raw in `extra` instead of
    /// failing the whole frame.
    pub fn parse(text: &str) -> ChatResult<Self> {
        let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
            return Err(ChatError::Serialization(
                "event frame is not a JSON object".into(),
            ));
        };
        let mut event = match serde_json::from_value::<Event>(Value::Object(fields.clone())) {
            Ok(event) => event,
            Err(e) => Self::from_partial(fields).ok_or(ChatError::from(e))?,
        };
        event.received_at = Some(Utc::now());
        Ok(event)
    }

    /// Field-by-field decode used when the typed decode fails.
    fn from_partial(mut fields: Map<String, Value>) -> Option<Self> {
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => EventType::from(kind),
            _ => return None,
        };
        let mut event = Self::new(kind);
        event.cid = take_field(&mut fields, "cid");
        event.channel_type = take_field(&mut fields, "channel_type");
        event.channel_id = take_field(&mut fields, "channel_id");
        event.user = take_field(&mut fields, "user");
        event.me = take_field(&mut fields, "me");
        event.message = take_field(&mut fields, "message");
        event.member = take_field(&mut fields, "member");
        event.channel = take_field(&mut fields, "channel");
        event.live_location = take_field(&mut fields, "live_location");
        event.connection_id = take_field(&mut fields, "connection_id");
        event.watcher_count = take_field(&mut fields, "watcher_count");
        event.online = take_field(&mut fields, "online");
        event.hard_delete = take_field(&mut fields, "hard_delete");
        event.created_at = take_field(&mut fields, "created_at");
        event.extra = fields;
        Some(event)
    }

    /// `connection.changed` with the given online flag.
    pub fn connection_changed(online: bool) -> Self {
        let mut event = Self::new(EventType::ConnectionChanged);
        event.online = Some(online);
        event
    }

    /// `connection.recovered`, emitted once caches are back in sync.
    pub fn connection_recovered() -> Self {
        let mut event = Self::new(EventType::ConnectionRecovered);
        event.online = Some(true);
        event
    }

    /// Routing key of the event: the `cid` field, or `channel_type:channel_id`.
    pub fn channel_cid(&self) -> Option<String> {
        if let Some(cid) = &self.cid {
            return Some(cid.clone());
        }
        match (&self.channel_type, &self.channel_id) {
            (Some(t), Some(id)) => Some(format!("{t}{CID_SEPARATOR}{id}")),
            _ => None,
        }
    }

    /// Id of the user the event is about.
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Server time when present, else the local receive time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.received_at)
    }
}

/// Move `key` out of `fields` if it decodes as `T`; otherwise leave it.
fn take_field<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = fields.get(key)?;
    let decoded = serde_json::from_value(value.clone()).ok()?;
    fields.remove(key);
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip_names() {
        for name in [
            "health.check",
            "message.new",
            "user.presence.changed",
            "notification.channel_deleted",
            "live_location.stopped",
        ] {
            assert_eq!(EventType::from_str(name).as_str(), name);
        }
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let event = Event::parse(r#"{"type":"reaction.new","cid":"messaging:a","reaction":{"type":"like"}}"#)
            .unwrap();
        assert_eq!(event.kind, EventType::Unknown("reaction.new".into()));
        assert_eq!(event.kind.as_str(), "reaction.new");
        assert_eq!(event.extra["reaction"]["type"], "like");
        assert!(event.received_at.is_some());
    }

    #[test]
    fn test_channel_cid_fallback() {
        let event = Event::parse(
            r#"{"type":"message.new","channel_type":"team","channel_id":"red","message":{"id":"m1","text":"x"}}"#,
        )
        .unwrap();
        assert_eq!(event.channel_cid().as_deref(), Some("team:red"));
        assert_eq!(event.message.as_ref().map(|m| m.id.as_str()), Some("m1"));
    }

    #[test]
    fn test_health_check_parses_me() {
        let event = Event::parse(
            r#"{"type":"health.check","connection_id":"c1","me":{"id":"alice","total_unread_count":3}}"#,
        )
        .unwrap();
        assert!(event.kind.is_health_event());
        assert_eq!(event.me.as_ref().unwrap().extra["total_unread_count"], 3);
    }

    #[test]
    fn test_serialize_keeps_type_tag() {
        let value = serde_json::to_value(Event::connection_changed(false)).unwrap();
        assert_eq!(value["type"], "connection.changed");
        assert_eq!(value["online"], false);
    }

    #[test]
    fn test_non_object_frame_is_error() {
        assert!(Event::parse("[1,2,3]").is_err());
        assert!(Event::parse("not json").is_err());
        assert!(Event::parse(r#"{"cid":"messaging:a"}"#).is_err());
        assert!(Event::parse(r#"{"type":7}"#).is_err());
    }

    #[test]
    fn test_partial_payload_keeps_event() {
        let event = Event::parse(
            r#"{"type":"live_location.stopped","cid":"messaging:a","created_at":"2024-01-01T00:00:00Z","live_location":{"user_id":"bob","end_at":"2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventType::LiveLocationStopped);
        assert_eq!(event.cid.as_deref(), Some("messaging:a"));
        assert!(event.created_at.is_some());
        assert!(event.live_location.is_none());
        assert_eq!(event.extra["live_location"]["user_id"], "bob");
        assert!(event.received_at.is_some());

        let event = Event::parse(r#"{"type":"user.updated","user":{"name":"x"}}"#).unwrap();
        assert_eq!(event.kind, EventType::UserUpdated);
        assert!(event.user.is_none());
        assert_eq!(event.extra["user"]["name"], "x");
        assert!(!event.extra.contains_key("type"));
    }
}
