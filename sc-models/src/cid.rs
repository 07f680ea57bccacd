//! Composite channel identifier (`type:id`).

use std::fmt;
use std::str::FromStr;

use sc_core::constants::CID_SEPARATOR;
use sc_core::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};

/// Identifies a channel by its type and id. Serialized as `"type:id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid {
    channel_type: String,
    id: String,
}

impl Cid {
    /// Build a cid, rejecting empty parts and parts containing the separator.
    pub fn new(channel_type: impl Into<String>, id: impl Into<String>) -> ChatResult<Self> {
        let channel_type = channel_type.into();
        let id = id.into();
        validate_part("channel type", &channel_type)?;
        validate_part("channel id", &id)?;
        Ok(Self { channel_type, id })
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

fn validate_part(what: &str, value: &str) -> ChatResult<()> {
    if value.is_empty() {
        return Err(ChatError::Config(format!("{what} must not be empty")));
    }
    if value.contains(CID_SEPARATOR) {
        return Err(ChatError::Config(format!(
            "{what} '{value}' must not contain '{CID_SEPARATOR}'"
        )));
    }
    Ok(())
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.channel_type, CID_SEPARATOR, self.id)
    }
}

impl FromStr for Cid {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel_type, id) = s
            .split_once(CID_SEPARATOR)
            .ok_or_else(|| ChatError::InvalidInput(format!("malformed cid '{s}'")))?;
        Self::new(channel_type, id)
    }
}

impl TryFrom<String> for Cid {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.to_string()
    }
}
