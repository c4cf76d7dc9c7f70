//! Message shapes on the host's event-bus subscription channel.
//!
//! Every frame is a JSON text object discriminated by `type`. Fields the
//! relay does not use (`ha_version`, `id` on inbound frames, …) are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Id carried by the single subscribe request sent per connection.
pub const SUBSCRIBE_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "result")]
    CommandResult {
        #[serde(default)]
        success: bool,
    },
    Event {
        event: EventEnvelope,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundMessage {
    /// Decode one text frame; `None` for anything that is not a JSON object
    /// with a string `type`.
    pub fn decode(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::AuthRequired => "auth_required",
            InboundMessage::AuthOk => "auth_ok",
            InboundMessage::AuthInvalid { .. } => "auth_invalid",
            InboundMessage::CommandResult { .. } => "result",
            InboundMessage::Event { .. } => "event",
            InboundMessage::Unknown => "unknown",
        }
    }
}

#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth { access_token: String },
    SubscribeEvents { id: u64, event_type: String },
}

// Hand-written so the access token never reaches a log line.
impl std::fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundMessage::Auth { .. } => f.write_str("Auth { access_token: <redacted> }"),
            OutboundMessage::SubscribeEvents { id, event_type } => f
                .debug_struct("SubscribeEvents")
                .field("id", id)
                .field("event_type", event_type)
                .finish(),
        }
    }
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
