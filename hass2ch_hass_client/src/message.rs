//! Home Assistant websocket messages.
//!
//! Server messages are decoded by their `type` discriminant into
//! [`ServerMessage`]. Client commands are encoded from [`Command`], wrapped in
//! an envelope carrying the request id.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{DecodeSnafu, Result};

/// Name of an event type, e.g. `state_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub const STATE_CHANGED: &'static str = "state_changed";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn state_changed() -> Self {
        Self::new(Self::STATE_CHANGED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_state_changed(&self) -> bool {
        self.0 == Self::STATE_CHANGED
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        ha_version: Option<String>,
    },
    AuthOk {
        ha_version: Option<String>,
    },
    AuthInvalid {
        message: Option<String>,
    },
    Result(ResultMessage),
    Event(EventMessage),
    Pong {
        id: u64,
    },
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).with_context(|_| DecodeSnafu {
            message: truncate(text, 256),
        })
    }

    /// Returns the request id this message responds to, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Result(result) => Some(result.id),
            Self::Event(event) => Some(event.id),
            Self::Pong { id } => Some(*id),
            Self::AuthRequired { .. } | Self::AuthOk { .. } | Self::AuthInvalid { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired { .. } => "auth_required",
            Self::AuthOk { .. } => "auth_ok",
            Self::AuthInvalid { .. } => "auth_invalid",
            Self::Result(_) => "result",
            Self::Event(_) => "event",
            Self::Pong { .. } => "pong",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResultError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// An event delivered on a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Id of the `subscribe_events` request that created the subscription.
    pub id: u64,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub time_fired: DateTime<Utc>,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub context: EventContext,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub id: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
}

/// Payload of a `state_changed` event. Other event types leave it empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<State>,
    #[serde(default)]
    pub new_state: Option<State>,
}

/// State of an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub context: Value,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,
}

/// Commands sent by the client. Every command is tagged with a request id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SubscribeEvents {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<EventType>,
    },
    UnsubscribeEvents {
        subscription: u64,
    },
    GetStates,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeEvents { .. } => "subscribe_events",
            Self::UnsubscribeEvents { .. } => "unsubscribe_events",
            Self::GetStates => "get_states",
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CommandEnvelope<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub command: &'a Command,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "auth")]
pub(crate) struct AuthMessage<'a> {
    pub access_token: &'a str,
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
