//! Parallel-safe batching of tool calls.
//!
//! The safe set is a data property: read-only tools that may run
//! concurrently inside one batch. Any other tool forms a singleton batch, a
//! sequential barrier between the safe runs around it.

use crate::message::ToolCall;

/// Read-only tools safe for concurrent execution within a batch.
pub const PARALLEL_SAFE_TOOLS: &[&str] = &[
    "file_read",
    "file_list",
    "knowledge_search",
    "memory_search",
    "identity_status",
    "goal_status",
    "schedule_list",
    "swarm_status",
    "email_list",
    "email_read",
    "email_search",
];

fn is_parallel_safe(name: &str) -> bool {
    PARALLEL_SAFE_TOOLS.contains(&name)
}

/// Groups tool calls into execution batches: consecutive parallel-safe tools
/// share a batch, every other tool is a singleton barrier. Call order is
/// preserved across and within batches.
pub fn group_tool_calls(tool_calls: &[ToolCall]) -> Vec<Vec<ToolCall>> {
    let mut groups: Vec<Vec<ToolCall>> = Vec::new();
    let mut current_safe: Vec<ToolCall> = Vec::new();

    for tc in tool_calls {
        if is_parallel_safe(tc.name()) {
            current_safe.push(tc.clone());
        } else {
            if !current_safe.is_empty() {
                groups.push(std::mem::take(&mut current_safe));
            }
            groups.push(vec![tc.clone()]);
        }
    }
    if !current_safe.is_empty() {
        groups.push(current_safe);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({}))
    }

    /// **Scenario**: Plan [A, A, B, C, C] with A and C safe and B not yields
    /// batches [A, A] | [B] | [C, C] in call order.
    #[test]
    fn safe_runs_batch_unsafe_barriers() {
        let calls = vec![
            call("1", "file_read"),
            call("2", "file_read"),
            call("3", "file_write"),
            call("4", "knowledge_search"),
            call("5", "knowledge_search"),
        ];
        let groups = group_tool_calls(&calls);
        let shape: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|c| c.name()).collect())
            .collect();
        assert_eq!(
            shape,
            vec![
                vec!["file_read", "file_read"],
                vec!["file_write"],
                vec!["knowledge_search", "knowledge_search"],
            ]
        );
        let order: Vec<&str> = groups.iter().flatten().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3", "4", "5"]);
    }

    /// **Scenario**: All-unsafe plans become singleton barriers; all-safe
    /// plans become one batch; empty plans yield no groups.
    #[test]
    fn degenerate_shapes() {
        let unsafe_only = group_tool_calls(&[call("1", "file_write"), call("2", "shell_execute")]);
        assert_eq!(unsafe_only.len(), 2);
        assert!(unsafe_only.iter().all(|g| g.len() == 1));

        let safe_only = group_tool_calls(&[call("1", "file_read"), call("2", "file_list")]);
        assert_eq!(safe_only.len(), 1);
        assert_eq!(safe_only[0].len(), 2);

        assert!(group_tool_calls(&[]).is_empty());
    }
}
