//! Live location sharing.
//!
//! A share starts as a message carrying `shared_location`; later positions
//! and the final stop go through `PUT /users/live_locations`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sc_core::error::ChatResult;
use sc_models::validate_coordinates;

use super::to_body;
use crate::request::ApiRequest;

/// Body of `PUT /users/live_locations`.
#[derive(Debug, Clone, Serialize)]
pub struct LocationUpdate {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_device_id: Option<String>,
}

/// Move an active share. Coordinates are checked before anything is sent.
pub fn update_live_location(update: &LocationUpdate) -> ChatResult<ApiRequest> {
    if let (Some(lat), Some(lng)) = (update.latitude, update.longitude) {
        validate_coordinates(lat, lng)?;
    }
    Ok(ApiRequest::put("/users/live_locations").json(to_body(update)?))
}

/// End a share now.
pub fn stop_live_location(message_id: &str, now: DateTime<Utc>) -> ChatResult<ApiRequest> {
    update_live_location(&LocationUpdate {
        message_id: message_id.to_string(),
        latitude: None,
        longitude: None,
        end_at: Some(now),
        created_by_device_id: None,
    })
}
