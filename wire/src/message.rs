//! Gateway message envelope and constructor helpers.
//!
//! Every message is a self-describing JSON record `{type, id, session_id,
//! channel, user_id, data}`. `id` is fresh on each outbound message; an
//! `approval_response` echoes the id of the `approval_request` it answers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::event::EventType;

/// Message type discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Channel adapter → gateway: user chat input.
    Chat,
    /// Gateway → channel adapter: agent reply (stream-capable via `done`).
    Response,
    /// Gateway → channel adapter: a tool wants approval.
    ApprovalRequest,
    /// Channel adapter → gateway: approval decision, id echoes the request.
    ApprovalResponse,
    /// Channel adapter → gateway: slash command.
    Command,
    /// Gateway → channel adapter: background activity event.
    Event,
    /// Bidirectional heartbeat.
    Status,
    /// Error with a human-readable detail.
    Error,
}

/// One gateway protocol message.
///
/// **Interaction**: Serialized as one JSON text frame per message on the
/// WebSocket. `from_wire(to_wire(m)) == m` on all public fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl GatewayMessage {
    fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            id: Uuid::new_v4().to_string(),
            session_id: String::new(),
            channel: String::new(),
            user_id: String::new(),
            data: empty_object(),
        }
    }

    /// Serializes to a single-line JSON frame.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A GatewayMessage is always representable; data is already a Value.
            String::from("{\"type\":\"error\",\"id\":\"\",\"data\":{\"detail\":\"encode failed\"}}")
        })
    }

    /// Parses a JSON frame into a message.
    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Builds a chat message from a channel adapter.
    pub fn chat(
        content: impl Into<String>,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::new(MessageType::Chat);
        m.channel = channel.into();
        m.user_id = user_id.into();
        m.session_id = session_id.into();
        m.data = json!({ "content": content.into() });
        m
    }

    /// Builds a response from the gateway to a channel adapter.
    pub fn response(
        session_id: impl Into<String>,
        content: impl Into<String>,
        done: bool,
        reply_to: impl Into<String>,
    ) -> Self {
        let mut m = Self::new(MessageType::Response);
        m.session_id = session_id.into();
        m.data = json!({
            "content": content.into(),
            "done": done,
            "reply_to": reply_to.into(),
        });
        m
    }

    /// Builds an approval request for adapters to present to the user.
    pub fn approval_request(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        params: Value,
    ) -> Self {
        let mut m = Self::new(MessageType::ApprovalRequest);
        m.session_id = session_id.into();
        m.data = json!({
            "tool_name": tool_name.into(),
            "description": description.into(),
            "params": params,
        });
        m
    }

    /// Builds an approval response; `request_id` must echo the request's id.
    pub fn approval_response(request_id: impl Into<String>, approved: bool) -> Self {
        let mut m = Self::new(MessageType::ApprovalResponse);
        m.id = request_id.into();
        m.data = json!({ "approved": approved });
        m
    }

    /// Builds an event message for a session (empty session id = global).
    pub fn event(session_id: impl Into<String>, event: EventType, data: Value) -> Self {
        let mut m = Self::new(MessageType::Event);
        m.session_id = session_id.into();
        let mut obj = json!({ "event": event });
        if let (Some(target), Some(extra)) = (obj.as_object_mut(), data.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        m.data = obj;
        m
    }

    /// Builds a command message (slash commands: status, sessions, ...).
    pub fn command(command: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut m = Self::new(MessageType::Command);
        m.session_id = session_id.into();
        m.data = json!({ "command": command.into() });
        m
    }

    /// Builds a status/heartbeat message.
    pub fn status(state: impl Into<String>, data: Value) -> Self {
        let mut m = Self::new(MessageType::Status);
        m.data = json!({ "state": state.into(), "detail": data });
        m
    }

    /// Builds an error message with an optional reply_to correlation id.
    pub fn error(
        detail: impl Into<String>,
        session_id: impl Into<String>,
        reply_to: impl Into<String>,
    ) -> Self {
        let mut m = Self::new(MessageType::Error);
        m.session_id = session_id.into();
        m.data = json!({
            "detail": detail.into(),
            "reply_to": reply_to.into(),
        });
        m
    }

    /// Reads the event type out of an `event` message, if present and known.
    pub fn event_type(&self) -> Option<EventType> {
        if self.msg_type != MessageType::Event {
            return None;
        }
        self.data
            .get("event")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
