//! Conversation message types shared by the agent loop, sessions, and the
//! LLM router interface.
//!
//! Roles follow the chat-completion convention: system, user, assistant,
//! tool. Assistant messages may carry tool calls; tool messages carry the
//! `tool_call_id` they answer and a JSON-encoded content payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation requested by the LLM.
///
/// Wire shape is `{id, function: {name, arguments}}`; `arguments` is either a
/// JSON-encoded string or an already-decoded object, and
/// [`ToolCall::parsed_arguments`] normalizes both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolFunction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            function: ToolFunction {
                name: name.into(),
                arguments,
            },
        }
    }

    /// Tool name shorthand.
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decodes arguments: JSON text is parsed, decoded values pass through,
    /// null becomes an empty object.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        match &self.function.arguments {
            Value::String(raw) => serde_json::from_str(raw),
            Value::Null => Ok(Value::Object(Default::default())),
            other => Ok(other.clone()),
        }
    }
}

/// A single conversation entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: id of the call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message that carries tool-call instructions.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool result message answering `call_id` with a JSON-encoded payload.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: Constructors produce the right role and fields.
    #[test]
    fn constructors_set_role_and_fields() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        let t = ChatMessage::tool("c1", "{}");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("c1"));
    }

    /// **Scenario**: parsed_arguments accepts JSON text, decoded objects, and null.
    #[test]
    fn parsed_arguments_normalizes_all_shapes() {
        let text = ToolCall::new("1", "t", json!(r#"{"path": "a.txt"}"#));
        assert_eq!(text.parsed_arguments().unwrap(), json!({"path": "a.txt"}));

        let decoded = ToolCall::new("2", "t", json!({"n": 3}));
        assert_eq!(decoded.parsed_arguments().unwrap(), json!({"n": 3}));

        let null = ToolCall::new("3", "t", Value::Null);
        assert_eq!(null.parsed_arguments().unwrap(), json!({}));

        let bad = ToolCall::new("4", "t", json!("not json"));
        assert!(bad.parsed_arguments().is_err());
    }

    /// **Scenario**: Messages round-trip through serde; empty tool_calls are
    /// omitted from the wire form.
    #[test]
    fn serde_roundtrip_and_omission() {
        let m = ChatMessage::assistant_with_tools(
            "checking",
            vec![ToolCall::new("c1", "file_read", json!({"path": "x"}))],
        );
        let raw = serde_json::to_string(&m).unwrap();
        let back: ChatMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, m);

        let plain = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert!(!plain.contains("tool_calls"));
        assert!(!plain.contains("tool_call_id"));
    }
}
