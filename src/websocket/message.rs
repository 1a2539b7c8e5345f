use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

/// Event-type keys published by the back office
pub mod event_types {
    pub const CLAIM_STATUS: &str = "claim_status";
    pub const RODTEP_UPDATE: &str = "rodtep_update";
    pub const DOCUMENT_PROCESSED: &str = "document_processed";
    pub const NOTIFICATION: &str = "notification";
    pub const PONG: &str = "pong";
}

/// Inbound event: a routing key plus every other top-level field verbatim.
///
/// Wire shape is `{"type": "<key>", ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Decode a text frame. Anything that is not a JSON object with a string
    /// `type` field is rejected.
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(frame: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(frame).map_err(|_| FrameError::InvalidUtf8)?;
        Self::decode(text)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Deserialize the payload fields into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
}

impl ClientMessage {
    pub fn subscribe(channels: Vec<String>) -> Self {
        Self::Subscribe { channels }
    }

    pub fn unsubscribe(channels: Vec<String>) -> Self {
        Self::Unsubscribe { channels }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
