//! System prompt assembly.
//!
//! One place composes the policy text with the dynamic context blocks
//! (knowledge, capabilities, active goal, identity) so the loop itself never
//! embeds prompt copy.

use crate::tools::ToolSpec;

const POLICY: &str = "\
You are an autonomous assistant working in a plan-execute-reflect loop.

How to work:
- Decide the next action and call the matching tool; call several read-only \
tools together when they are independent.
- Tool results arrive as JSON messages; read them before planning the next step.
- When the task is done, reply with plain text and no tool calls. That ends the task.
- If an approach fails twice, change the approach instead of repeating it.
- Ask for approval implicitly by calling the tool; the runtime handles permissions.";

/// Inputs for one system prompt.
pub(crate) struct PromptParts<'a> {
    pub permission_mode: &'a str,
    pub knowledge_context: &'a str,
    pub tools: &'a [ToolSpec],
    pub goal_context: &'a str,
    pub identity_context: &'a str,
    pub current_goal: &'a str,
}

/// Composes the system prompt: policy, capabilities, knowledge, goal and
/// identity context, then the current goal. Empty blocks are skipped.
pub(crate) fn build_system_prompt(parts: &PromptParts<'_>) -> String {
    let mut sections = vec![POLICY.to_string()];
    sections.push(format!("Permission mode: {}", parts.permission_mode));

    if !parts.tools.is_empty() {
        let mut lines = vec!["<capabilities>".to_string()];
        for spec in parts.tools {
            lines.push(format!("- {}: {}", spec.name, spec.description));
        }
        lines.push("</capabilities>".to_string());
        sections.push(lines.join("\n"));
    }

    if !parts.knowledge_context.is_empty() {
        sections.push(parts.knowledge_context.to_string());
    }
    if !parts.goal_context.is_empty() {
        sections.push(parts.goal_context.to_string());
    }
    if !parts.identity_context.is_empty() {
        sections.push(parts.identity_context.to_string());
    }

    sections.push(format!("<current_task>\n{}\n</current_task>", parts.current_goal));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::PermissionLevel;
    use serde_json::json;

    /// **Scenario**: Set blocks appear in order, empty blocks are skipped,
    /// and the current task closes the prompt.
    #[test]
    fn composes_in_order_and_skips_empty() {
        let tools = vec![ToolSpec {
            name: "file_read".to_string(),
            description: "Read a file".to_string(),
            input_schema: json!({}),
            permission_level: PermissionLevel::Safe,
        }];
        let prompt = build_system_prompt(&PromptParts {
            permission_mode: "smart_auto",
            knowledge_context: "",
            tools: &tools,
            goal_context: "<active_goal>g1</active_goal>",
            identity_context: "",
            current_goal: "summarize the report",
        });
        assert!(prompt.starts_with("You are an autonomous assistant"));
        assert!(prompt.contains("- file_read: Read a file"));
        assert!(prompt.contains("<active_goal>g1</active_goal>"));
        assert!(!prompt.contains("Relevant Knowledge"));
        assert!(prompt.trim_end().ends_with("</current_task>"));
        let goal_pos = prompt.find("<active_goal>").unwrap();
        let task_pos = prompt.find("<current_task>").unwrap();
        assert!(goal_pos < task_pos);
    }
}
