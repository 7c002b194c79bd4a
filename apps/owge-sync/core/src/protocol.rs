use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Version announced in every authentication request.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Channel-level event names (not to be confused with the domain events
/// carried inside `deliver_message`).
pub mod channel_events {
    pub const AUTHENTICATION: &str = "authentication";
    pub const DELIVER_MESSAGE: &str = "deliver_message";
}

/// One named event on the real-time channel, encoded as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Builds the handshake frame. The body travels as a JSON string, not as
    /// a nested object, because servers in the field parse it themselves.
    pub fn authentication(request: &AuthRequest) -> Result<Self, FrameError> {
        let body = serde_json::to_string(request)?;
        Ok(Self::new(channel_events::AUTHENTICATION, Value::String(body)))
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the frame body, unwrapping string-encoded JSON when present.
    pub fn body(&self) -> Value {
        match &self.data {
            Value::String(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| self.data.clone())
            }
            other => other.clone(),
        }
    }
}

/// Credentials sent on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub value: String,
    pub protocol: String,
}

impl AuthRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            value: token.into(),
            protocol: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Server answer to [`AuthRequest`]. Kept as raw JSON so a rejection can be
/// handed back to the caller untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse(pub Value);

impl AuthResponse {
    pub fn is_ok(&self) -> bool {
        self.0.get("status").and_then(Value::as_str) == Some("ok")
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Envelope of every server push delivered on `deliver_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "eventName")]
    pub event_name: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl InboundMessage {
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Event name of a well-formed envelope; `None` when either the status
    /// or the event name is missing or empty.
    pub fn routable(&self) -> Option<&str> {
        let status = self.status.as_deref().filter(|s| !s.is_empty());
        let event = self.event_name.as_deref().filter(|e| !e.is_empty());
        status.and(event)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame payload is not a json object")]
    NotAnObject,
}
