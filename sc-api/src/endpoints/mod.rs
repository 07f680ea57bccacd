//! Request builders, grouped by resource.
//!
//! Each function only describes the call; the session fills in base URL and
//! credentials and sends it through a [`crate::Requester`].

pub mod channels;
pub mod locations;
pub mod search;
pub mod users;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sc_core::error::{ChatError, ChatResult};

/// One sort clause: `{"field": ..., "direction": 1 | -1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    pub field: String,
    pub direction: i8,
}

impl SortParam {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: 1,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: -1,
        }
    }
}

/// Serialize a payload struct into a JSON body.
pub(crate) fn to_body<T: Serialize>(payload: &T) -> ChatResult<Value> {
    serde_json::to_value(payload).map_err(|e| ChatError::Serialization(e.to_string()))
}

/// GET endpoints take their whole payload as one `payload` query parameter.
pub(crate) fn to_payload_param<T: Serialize>(payload: &T) -> ChatResult<String> {
    serde_json::to_string(payload).map_err(|e| ChatError::Serialization(e.to_string()))
}
