//! Scripted router for tests: a queue of canned completions.
//!
//! Each `complete` call pops the next completion; an empty queue returns a
//! fixed final text so loops always terminate. Optionally records a fixed
//! cost per call into the tracker so budget gates can be exercised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Completion, CostTracker, LlmError, LlmRouter, TaskType};
use crate::message::ChatMessage;
use crate::tools::ToolSpec;

/// Router returning pre-scripted completions in order.
pub struct ScriptedRouter {
    script: Mutex<VecDeque<Completion>>,
    /// Returned when the script runs dry.
    fallback: String,
    /// Cost recorded per call.
    cost_per_call: f64,
    calls: AtomicUsize,
    tracker: CostTracker,
}

impl ScriptedRouter {
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: "Task complete.".to_string(),
            cost_per_call: 0.0,
            calls: AtomicUsize::new(0),
            tracker: CostTracker::default(),
        }
    }

    /// Router that always answers with the same text and no tool calls.
    pub fn always_text(content: impl Into<String>) -> Self {
        let mut r = Self::new(Vec::new());
        r.fallback = content.into();
        r
    }

    /// Sets a fixed cost recorded on every call (builder).
    pub fn with_cost_per_call(mut self, cost_usd: f64) -> Self {
        self.cost_per_call = cost_usd;
        self
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmRouter for ScriptedRouter {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _task_type: TaskType,
        _tools: Option<&[ToolSpec]>,
        _temperature: f32,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tracker.record(self.cost_per_call);
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Provider("script lock poisoned".to_string()))?
            .pop_front();
        Ok(next.unwrap_or_else(|| Completion::text(self.fallback.clone())))
    }

    fn cost_tracker(&self) -> &CostTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::json;

    /// **Scenario**: Scripted completions come back in order, then the
    /// fallback text repeats forever.
    #[tokio::test]
    async fn scripted_then_fallback() {
        let router = ScriptedRouter::new(vec![
            Completion::with_tool_calls("", vec![ToolCall::new("c1", "file_read", json!({}))]),
            Completion::text("all done"),
        ]);
        let first = router.complete(&[], TaskType::Planning, None, 0.2).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        let second = router.complete(&[], TaskType::Planning, None, 0.2).await.unwrap();
        assert_eq!(second.content, "all done");
        let third = router.complete(&[], TaskType::Planning, None, 0.2).await.unwrap();
        assert_eq!(third.content, "Task complete.");
        assert_eq!(router.calls(), 3);
    }

    /// **Scenario**: Cost per call accumulates in the tracker.
    #[tokio::test]
    async fn cost_per_call_recorded() {
        let router = ScriptedRouter::always_text("ok").with_cost_per_call(0.01);
        for _ in 0..3 {
            router.complete(&[], TaskType::Simple, None, 0.0).await.unwrap();
        }
        assert!((router.cost_tracker().task_cost() - 0.03).abs() < 1e-9);
    }
}
