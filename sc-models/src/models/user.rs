//! User entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A chat user as the server reports it.
///
/// Custom user fields (anything the app stores besides the well-known ones)
/// land in `extra` and are sent back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub anon: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl User {
    /// A user carrying only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style name setter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the server currently reports the user as online.
    pub fn is_online(&self) -> bool {
        self.online.unwrap_or(false)
    }

    /// Fold a newer record for the same user into this one.
    ///
    /// Fields missing from `newer` keep their current value; custom fields
    /// are merged key by key.
    pub fn merge_from(&mut self, newer: &User) {
        if newer.name.is_some() {
            self.name = newer.name.clone();
        }
        if newer.image.is_some() {
            self.image = newer.image.clone();
        }
        if newer.role.is_some() {
            self.role = newer.role.clone();
        }
        if newer.online.is_some() {
            self.online = newer.online;
        }
        if newer.last_active.is_some() {
            self.last_active = newer.last_active;
        }
        if newer.deleted_at.is_some() {
            self.deleted_at = newer.deleted_at;
        }
        self.anon = newer.anon;
        for (k, v) in &newer.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}
