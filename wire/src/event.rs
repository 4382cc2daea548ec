//! Event subtypes carried inside `event` messages.
//!
//! The set is closed: adapters match on it exhaustively, and an unknown
//! string fails deserialization instead of silently passing through.

use serde::{Deserialize, Serialize};

/// Event subtype for `event` messages.
///
/// **Interaction**: Produced by the gateway and background activities
/// (scheduler, goal runner, mind, swarm); consumed by channel adapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskComplete,
    TaskError,
    StepProgress,
    SessionCreated,
    Notification,
    GoalStarted,
    GoalCheckpointComplete,
    GoalCompleted,
    GoalFailed,
    GoalPaused,
    GoalResumed,
    AgentSpawned,
    AgentCompleted,
    AgentFailed,
    AgentRedirected,
    AgentStopped,
    MindWakeup,
    MindAction,
    MindSleep,
    MindPaused,
    MindResumed,
    MindToolUse,
    MindRevenue,
    MindError,
}

impl EventType {
    /// Returns the wire string for this event type (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskComplete => "task_complete",
            Self::TaskError => "task_error",
            Self::StepProgress => "step_progress",
            Self::SessionCreated => "session_created",
            Self::Notification => "notification",
            Self::GoalStarted => "goal_started",
            Self::GoalCheckpointComplete => "goal_checkpoint_complete",
            Self::GoalCompleted => "goal_completed",
            Self::GoalFailed => "goal_failed",
            Self::GoalPaused => "goal_paused",
            Self::GoalResumed => "goal_resumed",
            Self::AgentSpawned => "agent_spawned",
            Self::AgentCompleted => "agent_completed",
            Self::AgentFailed => "agent_failed",
            Self::AgentRedirected => "agent_redirected",
            Self::AgentStopped => "agent_stopped",
            Self::MindWakeup => "mind_wakeup",
            Self::MindAction => "mind_action",
            Self::MindSleep => "mind_sleep",
            Self::MindPaused => "mind_paused",
            Self::MindResumed => "mind_resumed",
            Self::MindToolUse => "mind_tool_use",
            Self::MindRevenue => "mind_revenue",
            Self::MindError => "mind_error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
