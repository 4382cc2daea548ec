//! Mahout: a durable, multi-channel agent runtime.
//!
//! The core is a concurrent control plane around one SQLite store: the
//! plan-execute-reflect [`agent::Agent`] with per-session isolation, the
//! tool [`tools::Executor`] with permission checks and approvals, and four
//! supervised background activities (the [`schedule::Scheduler`], the
//! [`goal::GoalRunner`], the [`mind::AutonomousMind`], and the
//! [`swarm::SwarmManager`]), all broadcasting through a [`bus::EventSink`]
//! implemented by the WebSocket gateway.
//!
//! **Public API**: re-exports below; the `gateway` crate builds the server
//! on top of these.

pub mod agent;
pub mod approval;
pub mod bus;
pub mod email;
pub mod goal;
pub mod identity;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod message;
pub mod mind;
pub mod schedule;
pub mod session;
pub mod store;
pub mod swarm;
pub mod task;
pub mod tools;

pub use agent::{Agent, AgentResponse, RunHooks, StepProgress, TaskCompletion};
pub use approval::{ApprovalQueue, ApprovalRecord, PendingApprovals};
pub use bus::{EventSink, NullSink};
pub use goal::{Checkpoint, CheckpointStatus, Goal, GoalManager, GoalRunner, GoalStatus};
pub use knowledge::{KnowledgeChunk, KnowledgeHit, KnowledgeStore};
pub use llm::{Completion, CostTracker, LlmError, LlmRouter, LlmUsage, ScriptedRouter, TaskType};
pub use memory::{MemoryManager, TaskMemory, WorkingMemory};
pub use message::{ChatMessage, Role, ToolCall, ToolFunction};
pub use mind::{AutonomousMind, MindHandle};
pub use schedule::{
    parse_schedule, ParsedSchedule, ScheduleEntry, ScheduleError, ScheduleParseError, ScheduleRun,
    Scheduler, TaskOutcome, TaskRunner,
};
pub use session::{Session, SessionManager, MAX_CONVERSATION_HISTORY};
pub use store::{Row, Store, StoreError};
pub use swarm::{
    CiStatus, GhCli, GitCli, PrInfo, PrPlatform, ProcessHost, SwarmAgent, SwarmError,
    SwarmManager, SwarmStatus, TmuxHost, VcsHost,
};
pub use tools::{
    ApprovalFn, ApprovalRequest, ExecutionResult, Executor, PermissionLevel, Tool, ToolContext,
    ToolError, ToolRegistry, ToolSpec,
};
