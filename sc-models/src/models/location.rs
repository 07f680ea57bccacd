//! Live location sharing records.

use chrono::{DateTime, Utc};
use sc_core::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};

/// A user's shared position in a channel.
///
/// Entries without `end_at` are static; entries with it expire on their own
/// once that instant passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveLocation {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LiveLocation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_some_and(|end| end <= now)
    }

    /// Timestamp used to order this record against a stop marker.
    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// Check that a coordinate pair is on the globe.
///
/// Out-of-range values are rejected locally with `InvalidInput`, which
/// reports status 400 like the server would.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> ChatResult<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ChatError::InvalidInput(format!(
            "latitude {latitude} is outside [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ChatError::InvalidInput(format!(
            "longitude {longitude} is outside [-180, 180]"
        )));
    }
    Ok(())
}
