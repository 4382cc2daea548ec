//! Tools the autonomous mind injects for itself.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{PermissionLevel, Tool, ToolContext, ToolError, ToolSpec};
use crate::mind::MindHandle;

pub const TOOL_SET_NEXT_WAKEUP: &str = "set_next_wakeup";
pub const TOOL_UPDATE_SCRATCHPAD: &str = "update_scratchpad";

/// Lets the mind choose its own next wakeup interval.
pub struct SetNextWakeupTool {
    handle: MindHandle,
}

impl SetNextWakeupTool {
    pub fn new(handle: MindHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Tool for SetNextWakeupTool {
    fn name(&self) -> &str {
        TOOL_SET_NEXT_WAKEUP
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SET_NEXT_WAKEUP.to_string(),
            description: "Set how many seconds until your next autonomous wakeup. \
                          Use longer intervals when nothing is urgent."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "seconds": {
                        "type": "number",
                        "description": "Seconds until the next wakeup."
                    }
                },
                "required": ["seconds"]
            }),
            permission_level: PermissionLevel::Safe,
        }
    }

    async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<Value, ToolError> {
        let seconds = params
            .get("seconds")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ToolError::InvalidInput("seconds must be a number".to_string()))?;
        let applied = self.handle.set_next_wakeup(seconds);
        Ok(json!({ "next_wakeup_seconds": applied }))
    }
}

/// Rewrites the mind's persisted scratchpad.
pub struct UpdateScratchpadTool {
    handle: MindHandle,
}

impl UpdateScratchpadTool {
    pub fn new(handle: MindHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Tool for UpdateScratchpadTool {
    fn name(&self) -> &str {
        TOOL_UPDATE_SCRATCHPAD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_UPDATE_SCRATCHPAD.to_string(),
            description: "Replace your scratchpad (working memory across wakeups) \
                          with new markdown content."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Full new scratchpad content."
                    }
                },
                "required": ["content"]
            }),
            permission_level: PermissionLevel::Safe,
        }
    }

    async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<Value, ToolError> {
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("content must be a string".to_string()))?;
        self.handle
            .update_scratchpad(content)
            .map_err(|e| ToolError::Execution(format!("write scratchpad: {e}")))?;
        Ok(json!({ "bytes_written": content.len() }))
    }
}
