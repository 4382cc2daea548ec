//! LLM router abstraction used by the agent loop and the goal manager.
//!
//! The router owns provider selection and pricing; the core only sees the
//! [`LlmRouter`] trait: messages in, completion (text and/or tool calls) out,
//! plus a cost tracker the budget gates read. Concrete provider clients live
//! outside this crate; tests use [`ScriptedRouter`].

mod mock;

pub use mock::ScriptedRouter;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::{ChatMessage, ToolCall};
use crate::tools::ToolSpec;

/// Routing hint for a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    /// Agent loop planning turns.
    Planning,
    /// Cheap auxiliary calls (decomposition, summaries, evaluation).
    Simple,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Simple => "simple",
        }
    }
}

/// Token usage for one completion.
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completion from the router.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    /// Assistant text; empty when the model only issued tool calls.
    pub content: String,
    /// Tool calls for this turn; empty means the task is complete.
    pub tool_calls: Vec<ToolCall>,
    pub model_used: String,
    pub provider: String,
    pub usage: Option<LlmUsage>,
}

impl Completion {
    /// Text-only completion helper.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model_used: "mock".to_string(),
            provider: "mock".to_string(),
            ..Default::default()
        }
    }

    /// Tool-call completion helper.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            model_used: "mock".to_string(),
            provider: "mock".to_string(),
            ..Default::default()
        }
    }
}

/// Error from the router.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no provider available")]
    Unavailable,
}

/// Accumulates per-task and running cost; read by budget gates.
///
/// `reset_task` is called at the start of every agent run; `record` adds to
/// both the task accumulator and the running total.
#[derive(Debug, Default)]
pub struct CostTracker {
    task_usd: Mutex<f64>,
    total_usd: Mutex<f64>,
}

impl CostTracker {
    pub fn reset_task(&self) {
        if let Ok(mut t) = self.task_usd.lock() {
            *t = 0.0;
        }
    }

    pub fn record(&self, cost_usd: f64) {
        if let Ok(mut t) = self.task_usd.lock() {
            *t += cost_usd;
        }
        if let Ok(mut t) = self.total_usd.lock() {
            *t += cost_usd;
        }
    }

    /// Cost accumulated since the last `reset_task`.
    pub fn task_cost(&self) -> f64 {
        self.task_usd.lock().map(|t| *t).unwrap_or(0.0)
    }

    /// Running total since process start.
    pub fn task_total(&self) -> f64 {
        self.total_usd.lock().map(|t| *t).unwrap_or(0.0)
    }
}

/// LLM router: completion with task-type routing, health check, cost tracking.
#[async_trait]
pub trait LlmRouter: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        task_type: TaskType,
        tools: Option<&[ToolSpec]>,
        temperature: f32,
    ) -> Result<Completion, LlmError>;

    /// Per-provider reachability; defaults to empty (no providers).
    async fn health_check(&self) -> HashMap<String, bool> {
        HashMap::new()
    }

    fn cost_tracker(&self) -> &CostTracker;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: reset_task zeroes the task accumulator but keeps the total.
    #[test]
    fn cost_tracker_task_vs_total() {
        let t = CostTracker::default();
        t.record(0.25);
        t.record(0.50);
        assert!((t.task_cost() - 0.75).abs() < 1e-9);
        t.reset_task();
        assert_eq!(t.task_cost(), 0.0);
        assert!((t.task_total() - 0.75).abs() < 1e-9);
    }
}
