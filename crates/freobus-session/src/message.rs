//! Cross-context wire message.
//!
//! ```json
//! {
//!   "type": "SESSION_UPDATE",
//!   "sessionId": "…",
//!   "origin": "https://dapp.example",
//!   "data": { "timestamp": 1700000000000 },
//!   "signature": "…",
//!   "nonce": 4503599627370495
//! }
//! ```

use freobus_core::{FreobusResult, Origin, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of state change being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// An origin attached to (or refreshed) the session
    SessionUpdate,
    /// An origin left, or the session ended
    SessionTerminate,
    /// The session was re-validated by some context
    SessionValidate,
}

impl MessageType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::SessionUpdate => "SESSION_UPDATE",
            MessageType::SessionTerminate => "SESSION_TERMINATE",
            MessageType::SessionValidate => "SESSION_VALIDATE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message exchanged between contexts over the broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDAppMessage {
    /// Kind of state change
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Session the change refers to
    pub session_id: SessionId,
    /// Origin the change is about
    pub origin: Origin,
    /// Free-form payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Signature over [`CrossDAppMessage::canonical_payload`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Single-use token bound by the signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

/// Signed portion of a message, in a fixed field order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    #[serde(rename = "type")]
    message_type: MessageType,
    session_id: &'a SessionId,
    origin: &'a Origin,
    data: &'a Option<Map<String, Value>>,
    nonce: Option<u64>,
}

impl CrossDAppMessage {
    /// Unsigned message
    pub fn new(message_type: MessageType, session_id: SessionId, origin: Origin) -> Self {
        Self {
            message_type,
            session_id,
            origin,
            data: None,
            signature: None,
            nonce: None,
        }
    }

    /// Attach a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// The string that is signed and verified: type, session id, origin,
    /// data and nonce. The signature itself is excluded.
    pub fn canonical_payload(&self) -> FreobusResult<String> {
        let payload = CanonicalPayload {
            message_type: self.message_type,
            session_id: &self.session_id,
            origin: &self.origin,
            data: &self.data,
            nonce: self.nonce,
        };
        Ok(serde_json::to_string(&payload)?)
    }

    /// Sender's `data.timestamp` in epoch milliseconds
    pub fn timestamp(&self) -> Option<u64> {
        self.data.as_ref()?.get("timestamp")?.as_u64()
    }

    /// Encode for the wire
    pub fn to_json(&self) -> FreobusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire
    pub fn from_json(raw: &str) -> FreobusResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Best-effort origin and type of an undecodable payload, for diagnostics
pub(crate) fn describe_raw(raw: &str) -> (Option<Origin>, Option<String>) {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) else {
        return (None, None);
    };
    let origin = fields
        .get("origin")
        .and_then(Value::as_str)
        .map(Origin::from);
    let message_type = fields
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    (origin, message_type)
}
