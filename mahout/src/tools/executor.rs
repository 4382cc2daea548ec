//! One tool invocation end-to-end: parse, permission-check, dispatch, report.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info};

use config::PermissionMode;

use super::{PermissionLevel, Tool, ToolContext, ToolRegistry};
use crate::message::ToolCall;

/// What a tool wants to do, shown to the user for approval.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub description: String,
    pub params: Value,
}

/// Async approval callback: true = approved.
pub type ApprovalFn = Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, bool> + Send + Sync>;

/// Hook fired after every tool execution: (name, params, error).
pub type ToolHookFn = Arc<dyn Fn(&str, &Value, Option<&str>) + Send + Sync>;

/// Result of attempting one tool call.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub tool_name: String,
    pub call_id: String,
    /// Structured result on success.
    pub result: Option<Value>,
    /// True when the user (or a timeout) declined.
    pub denied: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn err(tool_name: &str, call_id: &str, error: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            call_id: call_id.to_string(),
            result: None,
            denied: false,
            error: Some(error),
        }
    }
}

/// Orchestrates tool execution with permission checks.
pub struct Executor {
    registry: Arc<ToolRegistry>,
    mode: PermissionMode,
    /// Per-tool "auto" / "ask" overrides.
    tool_overrides: BTreeMap<String, String>,
    disabled_tools: HashSet<String>,
    /// Default approval callback; per-call overrides take precedence.
    default_approval: Mutex<Option<ApprovalFn>>,
    context: ToolContext,
}

impl Executor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        mode: PermissionMode,
        permissions: &config::PermissionsConfig,
        context: ToolContext,
    ) -> Self {
        Self {
            registry,
            mode,
            tool_overrides: permissions.tool_overrides.clone(),
            disabled_tools: permissions.disabled_tools.iter().cloned().collect(),
            default_approval: Mutex::new(None),
            context,
        }
    }

    /// Installs the default approval callback used when no per-call override
    /// is given.
    pub fn set_approval_callback(&self, callback: Option<ApprovalFn>) {
        if let Ok(mut slot) = self.default_approval.lock() {
            *slot = callback;
        }
    }

    /// Executes one tool call. `approval_override` routes the approval to the
    /// requesting client (gateway) or an autonomous policy (mind); `on_tool`
    /// observes the outcome.
    pub async fn execute(
        &self,
        call: &ToolCall,
        approval_override: Option<&ApprovalFn>,
        on_tool: Option<&ToolHookFn>,
    ) -> ExecutionResult {
        let tool_name = call.name().to_string();
        let call_id = call.id.clone();

        let params = match call.parsed_arguments() {
            Ok(p) => p,
            Err(e) => {
                return ExecutionResult::err(&tool_name, &call_id, format!("Invalid tool arguments: {e}"))
            }
        };

        if self.disabled_tools.contains(&tool_name) {
            return ExecutionResult::err(
                &tool_name,
                &call_id,
                format!("Tool '{tool_name}' is disabled by configuration"),
            );
        }

        let Some(tool) = self.registry.get(&tool_name) else {
            return ExecutionResult::err(&tool_name, &call_id, format!("Unknown tool: {tool_name}"));
        };

        let validation_errors = tool.validate(&params);
        if !validation_errors.is_empty() {
            return ExecutionResult::err(
                &tool_name,
                &call_id,
                format!("Invalid parameters: {}", validation_errors.join("; ")),
            );
        }

        if !self.check_permission(tool.as_ref(), &params, approval_override).await {
            info!(tool = %tool_name, "tool denied by user");
            return ExecutionResult {
                tool_name,
                call_id,
                result: None,
                denied: true,
                error: None,
            };
        }

        info!(tool = %tool_name, "executing tool");
        match tool.execute(&self.context, params.clone()).await {
            Ok(result) => {
                if let Some(hook) = on_tool {
                    hook(&tool_name, &params, None);
                }
                ExecutionResult {
                    tool_name,
                    call_id,
                    result: Some(result),
                    denied: false,
                    error: None,
                }
            }
            Err(e) => {
                error!(tool = %tool_name, error = %e, "tool execution failed");
                let detail = format!("Tool execution failed: {e}");
                if let Some(hook) = on_tool {
                    hook(&tool_name, &params, Some(detail.as_str()));
                }
                ExecutionResult::err(&tool_name, &call_id, detail)
            }
        }
    }

    async fn check_permission(
        &self,
        tool: &dyn Tool,
        params: &Value,
        approval_override: Option<&ApprovalFn>,
    ) -> bool {
        let callback = approval_override.cloned().or_else(|| {
            self.default_approval.lock().ok().and_then(|slot| slot.clone())
        });

        match self.tool_overrides.get(tool.name()).map(String::as_str) {
            Some("auto") => return true,
            Some("ask") => {
                return match callback {
                    Some(cb) => cb(self.build_request(tool, params)).await,
                    None => false,
                };
            }
            _ => {}
        }

        if tool.spec().permission_level == PermissionLevel::Safe {
            return true;
        }
        if self.mode == PermissionMode::FullAuto {
            return true;
        }
        if self.mode == PermissionMode::SmartAuto && tool.is_safe_command(params) == Some(true) {
            return true;
        }

        match callback {
            Some(cb) => cb(self.build_request(tool, params)).await,
            // No way to ask: a required approval counts as denied.
            None => false,
        }
    }

    fn build_request(&self, tool: &dyn Tool, params: &Value) -> ApprovalRequest {
        ApprovalRequest {
            tool_name: tool.name().to_string(),
            description: describe_request(tool.name(), params),
            params: params.clone(),
        }
    }
}

/// Human-readable description of what a tool wants to do.
fn describe_request(tool_name: &str, params: &Value) -> String {
    let p = |key: &str| params.get(key).and_then(|v| v.as_str()).unwrap_or("?").to_string();
    match tool_name {
        "shell_execute" => format!("Run shell command: {}", p("command")),
        "file_write" => format!("Write to file: {}", p("path")),
        "file_delete" => format!("Delete: {}", p("path")),
        "file_move" => format!("Move {} to {}", p("source"), p("destination")),
        _ => format!("Execute {tool_name}"),
    }
}
