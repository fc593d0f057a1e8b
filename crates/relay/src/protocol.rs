//! JSON envelopes exchanged over the WebSocket transport.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::Snapshot;

/// Server → client events, borrowing the registry for serialization.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent<'a> {
    Users(&'a Snapshot),
}

/// Owned form of [`ServerEvent`] used by clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    Users(Snapshot),
}

/// Client → server events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    UserLocation(LocationReport),
    /// Informational only; the relay logs it and changes nothing.
    Track(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
}

impl LocationReport {
    pub fn new(lat: f64, lng: f64, name: Option<String>) -> Self {
        Self {
            lat,
            lng,
            name: name.map(Value::String),
        }
    }

    /// The reported name when it is a JSON string; anything else is ignored.
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().and_then(Value::as_str)
    }
}
