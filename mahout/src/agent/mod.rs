//! The plan-execute-reflect agent.
//!
//! [`Agent`] is immutable configuration: router, registry, executor, and the
//! managers it consults for context. Every invocation runs against an
//! explicit conversation history (its own detached one for direct calls,
//! a session's for gateway chats, a fresh one for background activities),
//! so background work can never pollute user conversations.

pub mod batch;
mod guard;
mod prompt;
mod runner;

pub use batch::{group_tool_calls, PARALLEL_SAFE_TOOLS};
pub use guard::wrap_tool_result;

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::goal::GoalManager;
use crate::identity::IdentityManager;
use crate::knowledge::KnowledgeStore;
use crate::llm::LlmRouter;
use crate::memory::MemoryManager;
use crate::message::ChatMessage;
use crate::session::{Session, MAX_CONVERSATION_HISTORY};
use crate::tools::{ApprovalFn, Executor, ToolHookFn, ToolRegistry};

/// Final response from the agent to the caller.
#[derive(Clone, Debug, Default)]
pub struct AgentResponse {
    pub content: String,
    pub steps_taken: u32,
    /// Tool names in invocation order (repeats included).
    pub tool_calls_made: Vec<String>,
}

/// Step-progress payload for the on_step hook.
#[derive(Clone, Debug)]
pub struct StepProgress {
    pub step: u32,
    pub tool_name: String,
    /// Planner text accompanying the tool calls.
    pub thought: String,
    pub params: Value,
}

/// Summary passed to the task-complete callback.
#[derive(Clone, Debug)]
pub struct TaskCompletion {
    pub goal: String,
    pub content: String,
    pub steps: u32,
    pub cost_usd: f64,
}

pub type StepFn = Arc<dyn Fn(StepProgress) -> BoxFuture<'static, ()> + Send + Sync>;
pub type TaskCompleteFn = Arc<dyn Fn(TaskCompletion) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-invocation callbacks. The gateway routes approvals to the requesting
/// client; the mind installs its own policy and tool hook. Nothing here is
/// mutated on the agent itself.
#[derive(Clone, Default)]
pub struct RunHooks {
    pub approval: Option<ApprovalFn>,
    pub on_step: Option<StepFn>,
    pub on_tool: Option<ToolHookFn>,
}

/// The plan-execute-reflect driver.
pub struct Agent {
    pub(crate) router: Arc<dyn LlmRouter>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) executor: Arc<Executor>,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) knowledge: Arc<KnowledgeStore>,
    pub(crate) identity: Option<Arc<IdentityManager>>,
    pub(crate) goals: Option<Arc<GoalManager>>,
    pub(crate) config: config::AgentConfig,
    /// History for direct `run` calls only.
    own_history: tokio::sync::Mutex<Vec<ChatMessage>>,
    on_task_complete: Mutex<Option<TaskCompleteFn>>,
}

impl Agent {
    pub fn new(
        router: Arc<dyn LlmRouter>,
        registry: Arc<ToolRegistry>,
        executor: Arc<Executor>,
        memory: Arc<MemoryManager>,
        knowledge: Arc<KnowledgeStore>,
        config: config::AgentConfig,
    ) -> Self {
        Self {
            router,
            registry,
            executor,
            memory,
            knowledge,
            identity: None,
            goals: None,
            config,
            own_history: tokio::sync::Mutex::new(Vec::new()),
            on_task_complete: Mutex::new(None),
        }
    }

    /// Attaches the identity manager (builder).
    pub fn with_identity(mut self, identity: Arc<IdentityManager>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attaches the goal manager for goal-context injection (builder).
    pub fn with_goals(mut self, goals: Arc<GoalManager>) -> Self {
        self.goals = Some(goals);
        self
    }

    /// Callback fired after every completed task (used to resume the mind).
    pub fn set_on_task_complete(&self, callback: Option<TaskCompleteFn>) {
        if let Ok(mut slot) = self.on_task_complete.lock() {
            *slot = callback;
        }
    }

    pub(crate) fn task_complete_callback(&self) -> Option<TaskCompleteFn> {
        self.on_task_complete.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn router(&self) -> &Arc<dyn LlmRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Direct mode: runs against the agent's own detached history.
    pub async fn run(&self, goal: &str) -> AgentResponse {
        let mut history = self.own_history.lock().await;
        self.run_with_history(goal, &mut history, &RunHooks::default(), "agent")
            .await
    }

    /// Gateway mode: runs against the session's history with session-routed
    /// hooks, then touches the session.
    pub async fn run_session(
        &self,
        goal: &str,
        session: &mut Session,
        hooks: RunHooks,
    ) -> AgentResponse {
        let session_id = session.session_id.clone();
        let response = self
            .run_with_history(goal, &mut session.conversation_history, &hooks, &session_id)
            .await;
        session.touch();
        response
    }

    /// Background mode: runs against a fresh history that is discarded
    /// afterwards. Used by the scheduler, goal runner, and mind.
    pub async fn run_detached(&self, prompt: &str, hooks: RunHooks) -> AgentResponse {
        let mut history = Vec::new();
        self.run_with_history(prompt, &mut history, &hooks, "background")
            .await
    }

    /// Clears the direct-mode history.
    pub async fn clear_conversation(&self) {
        self.own_history.lock().await.clear();
    }
}

/// Appends a user/assistant pair and trims to the history bound.
pub(crate) fn append_turn(history: &mut Vec<ChatMessage>, user_msg: &str, assistant_msg: &str) {
    history.push(ChatMessage::user(user_msg));
    history.push(ChatMessage::assistant(assistant_msg));
    let len = history.len();
    if len > MAX_CONVERSATION_HISTORY {
        history.drain(..len - MAX_CONVERSATION_HISTORY);
    }
}

#[async_trait::async_trait]
impl crate::schedule::TaskRunner for Agent {
    async fn run_task(&self, goal: &str) -> Result<crate::schedule::TaskOutcome, String> {
        let response = self.run_detached(goal, RunHooks::default()).await;
        Ok(crate::schedule::TaskOutcome {
            content: response.content,
            steps_taken: response.steps_taken,
        })
    }
}
