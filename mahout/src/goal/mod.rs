//! Goals: decomposition into ordered checkpoints with persisted progress.
//!
//! A goal moves planning → active → (paused|completed|failed|cancelled);
//! exactly one checkpoint is active at a time and `current_checkpoint`
//! tracks the minimum pending/active order. The [`GoalManager`] owns state
//! transitions and LLM-assisted planning; the [`GoalRunner`] executes
//! checkpoints in the background.

mod manager;
mod runner;

pub use manager::{GoalError, GoalManager};
pub use runner::GoalRunner;

use serde_json::Value;

use crate::store::Row;

/// Goal lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoalStatus {
    Planning,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Planning,
        }
    }
}

/// Checkpoint status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// A persistent, multi-checkpoint goal.
#[derive(Clone, Debug)]
pub struct Goal {
    pub goal_id: String,
    pub session_id: Option<String>,
    pub goal: String,
    pub status: GoalStatus,
    /// Normalized plan as a JSON array of checkpoint summaries.
    pub plan: Value,
    pub context_summary: String,
    pub current_checkpoint: i64,
    pub total_checkpoints: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub llm_calls_used: i64,
    pub cost_usd: f64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// One ordered step of a goal.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub goal_id: String,
    pub order: i64,
    pub title: String,
    pub description: String,
    pub success_criteria: String,
    pub status: CheckpointStatus,
    pub result_summary: Option<String>,
    pub attempts: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Result of a self-evaluation check.
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    pub on_track: bool,
    pub revision_needed: bool,
    pub reason: String,
    pub suggested_changes: Option<String>,
}

pub(crate) fn row_to_goal(row: &Row) -> Goal {
    Goal {
        goal_id: row.str("goal_id"),
        session_id: row.opt_str("session_id"),
        goal: row.str("goal"),
        status: GoalStatus::parse(&row.str("status")),
        plan: serde_json::from_str(&row.str("plan_json")).unwrap_or_else(|_| Value::Array(vec![])),
        context_summary: row.str("context_summary"),
        current_checkpoint: row.i64("current_checkpoint"),
        total_checkpoints: row.i64("total_checkpoints"),
        attempts: row.i64("attempts"),
        max_attempts: row.i64("max_attempts"),
        llm_calls_used: row.i64("llm_calls_used"),
        cost_usd: row.f64("cost_usd"),
        created_at: row.str("created_at"),
        updated_at: row.str("updated_at"),
        completed_at: row.opt_str("completed_at"),
    }
}

pub(crate) fn row_to_checkpoint(row: &Row) -> Checkpoint {
    Checkpoint {
        goal_id: row.str("goal_id"),
        order: row.i64("checkpoint_order"),
        title: row.str("title"),
        description: row.str("description"),
        success_criteria: row.str("success_criteria"),
        status: CheckpointStatus::parse(&row.str("status")),
        result_summary: row.opt_str("result_summary"),
        attempts: row.i64("attempts"),
        started_at: row.opt_str("started_at"),
        completed_at: row.opt_str("completed_at"),
    }
}
