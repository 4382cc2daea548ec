//! Agent loop end-to-end: batching order, stagnation gates, denial
//! handling, and session isolation.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use mahout::llm::{Completion, CostTracker, LlmError, LlmRouter, TaskType};
use mahout::message::{ChatMessage, Role, ToolCall};
use mahout::session::{SessionManager, MAX_CONVERSATION_HISTORY};
use mahout::tools::{
    PermissionLevel, Tool, ToolContext, ToolError, ToolRegistry, ToolSpec,
};
use mahout::RunHooks;

use support::build_agent;

/// Router that replays a script and records every message list it was
/// called with.
struct RecordingRouter {
    script: Mutex<Vec<Completion>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    tracker: CostTracker,
}

impl RecordingRouter {
    fn new(mut script: Vec<Completion>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
            tracker: CostTracker::default(),
        })
    }
}

#[async_trait]
impl LlmRouter for RecordingRouter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _task_type: TaskType,
        _tools: Option<&[ToolSpec]>,
        _temperature: f32,
    ) -> Result<Completion, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self.script.lock().unwrap().pop();
        Ok(next.unwrap_or_else(|| Completion::text("all done")))
    }

    fn cost_tracker(&self) -> &CostTracker {
        &self.tracker
    }
}

/// Tool that records a global start order and optionally sleeps, so
/// parallel batches finish out of call order.
struct TracingTool {
    name: &'static str,
    level: PermissionLevel,
    sleep_ms: u64,
    order: Arc<AtomicU64>,
    starts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for TracingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: "test tool".to_string(),
            input_schema: json!({"type": "object"}),
            permission_level: self.level,
        }
    }

    async fn execute(&self, _ctx: &ToolContext, _params: Value) -> Result<Value, ToolError> {
        self.starts.lock().unwrap().push(self.name.to_string());
        if self.sleep_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
        }
        let seq = self.order.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "tool": self.name, "finished": seq }))
    }
}

fn registry_with_tools(
    order: Arc<AtomicU64>,
    starts: Arc<Mutex<Vec<String>>>,
) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    // file_read and knowledge_search sit in the parallel-safe set;
    // file_write does not.
    for (name, level, sleep_ms) in [
        ("file_read", PermissionLevel::Safe, 30u64),
        ("knowledge_search", PermissionLevel::Safe, 0),
        ("file_write", PermissionLevel::Moderate, 0),
    ] {
        registry.register(Arc::new(TracingTool {
            name,
            level,
            sleep_ms,
            order: Arc::clone(&order),
            starts: Arc::clone(&starts),
        }));
    }
    registry
}

fn full_auto() -> config::AgentConfig {
    config::AgentConfig {
        permission_mode: config::PermissionMode::FullAuto,
        ..Default::default()
    }
}

/// **Scenario**: Plan [A, A, B, C, C] with A, C parallel-safe and B a
/// barrier produces batches [A, A] | [B] | [C, C], and the tool messages
/// fed back to the LLM appear in the exact call order c1..c5 even though
/// the slow A calls finish after the fast ones.
#[tokio::test]
async fn parallel_safe_batching_preserves_call_order() {
    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(AtomicU64::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));

    let plan = vec![
        ToolCall::new("c1", "file_read", json!({"path": "a"})),
        ToolCall::new("c2", "file_read", json!({"path": "b"})),
        ToolCall::new("c3", "file_write", json!({"path": "out"})),
        ToolCall::new("c4", "knowledge_search", json!({"q": "x"})),
        ToolCall::new("c5", "knowledge_search", json!({"q": "y"})),
    ];
    let router = RecordingRouter::new(vec![
        Completion::with_tool_calls("working", plan),
        Completion::text("finished"),
    ]);
    let registry = registry_with_tools(Arc::clone(&order), Arc::clone(&starts));
    let (agent, _store) = build_agent(router.clone(), registry, full_auto(), &dir);

    let response = agent.run_detached("do the thing", RunHooks::default()).await;
    assert_eq!(response.content, "finished");
    assert_eq!(
        response.tool_calls_made,
        vec!["file_read", "file_read", "file_write", "knowledge_search", "knowledge_search"]
    );

    // The barrier holds: file_write starts only after both reads started,
    // and before any knowledge_search.
    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.iter().filter(|s| *s == "file_read").count(), 2);
    let write_pos = starts.iter().position(|s| s == "file_write").unwrap();
    assert!(write_pos >= 2, "write after the read batch: {starts:?}");
    assert!(
        starts[write_pos + 1..].iter().all(|s| s == "knowledge_search"),
        "searches after the barrier: {starts:?}"
    );

    // Tool messages arrive in call order regardless of completion order.
    let seen = router.seen.lock().unwrap();
    let final_call = seen.last().unwrap();
    let tool_ids: Vec<String> = final_call
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(tool_ids, vec!["c1", "c2", "c3", "c4", "c5"]);
}

/// **Scenario**: With W=4, an agent that keeps calling file_read and never
/// produces a text response stops with reason "repeating file_read 4 times".
#[tokio::test]
async fn stagnation_by_repetition() {
    struct RepeatRouter(CostTracker);

    #[async_trait]
    impl LlmRouter for RepeatRouter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _task_type: TaskType,
            _tools: Option<&[ToolSpec]>,
            _temperature: f32,
        ) -> Result<Completion, LlmError> {
            Ok(Completion::with_tool_calls(
                "",
                vec![ToolCall::new("r", "file_read", json!({}))],
            ))
        }

        fn cost_tracker(&self) -> &CostTracker {
            &self.0
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(AtomicU64::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with_tools(order, starts);
    let agent_config = config::AgentConfig {
        stagnation_window: 4,
        permission_mode: config::PermissionMode::FullAuto,
        ..Default::default()
    };
    let (agent, _store) = build_agent(
        Arc::new(RepeatRouter(CostTracker::default())),
        registry,
        agent_config,
        &dir,
    );

    let response = agent.run_detached("read forever", RunHooks::default()).await;
    assert!(
        response.content.contains("repeating file_read 4 times"),
        "got: {}",
        response.content
    );
    assert_eq!(response.steps_taken, 4);
}

/// **Scenario**: Five consecutive tool errors stop the loop with the
/// consecutive-errors reason; unknown tools produce the error payloads.
#[tokio::test]
async fn stagnation_by_consecutive_errors() {
    struct UnknownToolRouter(CostTracker);

    #[async_trait]
    impl LlmRouter for UnknownToolRouter {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _task_type: TaskType,
            _tools: Option<&[ToolSpec]>,
            _temperature: f32,
        ) -> Result<Completion, LlmError> {
            Ok(Completion::with_tool_calls(
                "",
                vec![ToolCall::new("x", "no_such_tool", json!({}))],
            ))
        }

        fn cost_tracker(&self) -> &CostTracker {
            &self.0
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ToolRegistry::new());
    let (agent, _store) = build_agent(
        Arc::new(UnknownToolRouter(CostTracker::default())),
        registry,
        full_auto(),
        &dir,
    );

    let response = agent.run_detached("try it", RunHooks::default()).await;
    assert!(
        response.content.contains("5 consecutive errors"),
        "got: {}",
        response.content
    );
}

/// **Scenario**: A denied tool produces the denial sentinel in the tool
/// message, does not count as an error, and the loop continues to the
/// final text.
#[tokio::test]
async fn denial_produces_sentinel_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(AtomicU64::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with_tools(order, starts);

    let router = RecordingRouter::new(vec![
        Completion::with_tool_calls("", vec![ToolCall::new("w1", "file_write", json!({"path": "x"}))]),
        Completion::text("took another path"),
    ]);
    // Ask mode with no approval callback: required approvals are denied.
    let agent_config = config::AgentConfig {
        permission_mode: config::PermissionMode::Ask,
        ..Default::default()
    };
    let (agent, _store) = build_agent(router.clone(), registry, agent_config, &dir);

    let response = agent.run_detached("write the file", RunHooks::default()).await;
    assert_eq!(response.content, "took another path");

    let seen = router.seen.lock().unwrap();
    let final_call = seen.last().unwrap();
    let tool_msg = final_call.iter().find(|m| m.role == Role::Tool).unwrap();
    let payload: Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(payload["error"], json!("User denied this tool execution."));
    assert!(payload["suggestion"].as_str().unwrap().contains("different approach"));
}

/// **Scenario**: Session runs append exactly one user/assistant pair to the
/// session's history (bounded at H) and leave the agent's own history
/// untouched; detached runs touch neither.
#[tokio::test]
async fn session_isolation_and_history_bound() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ToolRegistry::new());
    let router = RecordingRouter::new(vec![]);
    let (agent, store) = build_agent(router.clone(), registry, full_auto(), &dir);
    let sessions = SessionManager::new(store);

    let mut session = sessions.get_or_create("telegram", "u1").await.unwrap();
    for i in 0..15 {
        agent
            .run_session(&format!("question {i}"), &mut session, RunHooks::default())
            .await;
    }
    assert_eq!(session.conversation_history.len(), MAX_CONVERSATION_HISTORY);
    let roles: Vec<Role> = session.conversation_history.iter().map(|m| m.role).collect();
    for pair in roles.chunks(2) {
        assert_eq!(pair, [Role::User, Role::Assistant]);
    }

    // Background run: fresh history, session untouched.
    let before = session.conversation_history.clone();
    agent.run_detached("background chore", RunHooks::default()).await;
    assert_eq!(session.conversation_history, before);

    // The background prompt must not leak into the next session call's
    // context.
    agent
        .run_session("follow-up", &mut session, RunHooks::default())
        .await;
    let seen = router.seen.lock().unwrap();
    let last = seen.last().unwrap();
    assert!(last.iter().all(|m| !m.content.contains("background chore")));
}

/// **Scenario**: Completed tasks are persisted to task memory with the
/// tools used.
#[tokio::test]
async fn task_memory_persisted_on_completion() {
    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(AtomicU64::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with_tools(order, starts);
    let router = RecordingRouter::new(vec![
        Completion::with_tool_calls("", vec![ToolCall::new("c1", "file_read", json!({}))]),
        Completion::text("read it"),
    ]);
    let (agent, store) = build_agent(router, registry, full_auto(), &dir);

    agent.run_detached("inspect the config file", RunHooks::default()).await;

    // Memory write is fire-and-forget; give it a moment.
    let memory = mahout::MemoryManager::new(store);
    let mut found = Vec::new();
    for _ in 0..50 {
        found = memory.search_memory("inspect config", 5).await.unwrap();
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].outcome, "completed");
    assert_eq!(found[0].tools_used, vec!["file_read"]);
}
