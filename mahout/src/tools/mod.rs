//! Tool abstraction: descriptor, registry, and the permission-checked
//! executor.
//!
//! A tool is data (name, description, JSON schema, permission level) plus
//! one async `execute`. Dependencies reach tools through [`ToolContext`], a
//! typed handles record built once at startup; tools never get fields
//! patched onto them after construction.

pub mod executor;
pub mod mind;
pub mod registry;

pub use executor::{ApprovalFn, ApprovalRequest, ExecutionResult, Executor, ToolHookFn};
pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::store::Store;

/// How dangerous a tool is without user confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Read-only or otherwise harmless; always allowed.
    Safe,
    /// Mutating but recoverable; needs approval outside full_auto.
    Moderate,
    /// Destructive or externally visible; needs approval outside full_auto.
    Dangerous,
}

/// Tool descriptor sent to the LLM and used for permission decisions.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
    pub permission_level: PermissionLevel,
}

/// Typed handles passed to every tool execution.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Session on whose behalf the tool runs, when any.
    pub session_id: Option<String>,
    pub store: Option<Store>,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

/// A single callable tool.
///
/// **Interaction**: registered in [`ToolRegistry`]; invoked only through
/// [`Executor::execute`], which validates arguments and checks permissions
/// first.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Returns validation errors for the given params; empty means valid.
    /// The default checks the schema's `required` list for missing keys.
    fn validate(&self, params: &Value) -> Vec<String> {
        let spec = self.spec();
        let Some(required) = spec.input_schema.get("required").and_then(|r| r.as_array()) else {
            return Vec::new();
        };
        required
            .iter()
            .filter_map(|r| r.as_str())
            .filter(|key| params.get(key).is_none())
            .map(|key| format!("missing required parameter: {key}"))
            .collect()
    }

    /// Smart-auto opt-in: `Some(true)` means these specific params are safe
    /// to run without approval. `None` means the tool does not participate.
    fn is_safe_command(&self, _params: &Value) -> Option<bool> {
        None
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SchemaTool;

    #[async_trait]
    impl Tool for SchemaTool {
        fn name(&self) -> &str {
            "schema_tool"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "schema_tool".to_string(),
                description: "test".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "mode": {"type": "string"}},
                    "required": ["path"]
                }),
                permission_level: PermissionLevel::Safe,
            }
        }

        async fn execute(&self, _ctx: &ToolContext, _params: Value) -> Result<Value, ToolError> {
            Ok(json!({"ok": true}))
        }
    }

    /// **Scenario**: Default validate reports each missing required key and
    /// accepts params that carry them all.
    #[test]
    fn default_validate_checks_required() {
        let tool = SchemaTool;
        assert_eq!(
            tool.validate(&json!({})),
            vec!["missing required parameter: path".to_string()]
        );
        assert!(tool.validate(&json!({"path": "a"})).is_empty());
    }
}
