//! Wire envelope, request payloads and stored entities.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Name of the outbound message reporting a failed operation.
pub const ERROR_MESSAGE: &str = "error";

/// Display name given to every connection until it sends `editUser`.
pub const DEFAULT_USER_NAME: &str = "anonymous";

pub const USER_TABLE: &str = "user";
pub const CHANNEL_TABLE: &str = "channel";
pub const MESSAGE_TABLE: &str = "message";

/// The `{name, data}` envelope exchanged in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl Message {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// An `error` message carrying human-readable text.
    pub fn error(text: impl std::fmt::Display) -> Self {
        Self::new(ERROR_MESSAGE, Value::String(text.to_string()))
    }

    /// Decode an inbound text frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::Envelope)
    }

    /// Encode for the transport.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn is_error(&self) -> bool {
        self.name == ERROR_MESSAGE
    }
}

/// Decode the payload of the message `name` into its typed form.
pub fn decode_payload<T: DeserializeOwned>(name: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|source| Error::Decode {
        name: name.to_string(),
        source,
    })
}

// ---------- Request payloads ----------

/// Payload of `editUser`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditUser {
    pub name: String,
}

/// Payload of `addChannel`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddChannel {
    pub name: String,
}

/// Payload of `addChannelMessage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChannelMessage {
    pub channel_id: String,
    pub body: String,
}

/// Payload of `subscribeChannelMessage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeChannelMessage {
    pub channel_id: String,
}

// ---------- Stored entities ----------

/// Presence record of a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

/// A chat message posted to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub channel_id: String,
    pub body: String,
    pub author: String,
    /// Milliseconds since the Unix epoch, so the store orders it numerically.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
