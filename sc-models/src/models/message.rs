//! Message entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::location::LiveLocation;
use super::user::User;

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    /// `regular`, `ephemeral`, `error`, `reply`, `system` or `deleted`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub show_in_channel: bool,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_location: Option<LiveLocation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// A new outgoing message with the given id and text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind: None,
            user: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
            parent_id: None,
            show_in_channel: false,
            silent: false,
            pinned: false,
            shared_location: None,
            extra: Map::new(),
        }
    }

    /// Replies that live only in their thread are not part of the main list.
    pub fn is_thread_only(&self) -> bool {
        self.parent_id.is_some() && !self.show_in_channel
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some() || self.kind.as_deref() == Some("deleted")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}
