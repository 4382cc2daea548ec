//! Goal lifecycle, decomposition, checkpoint tracking, and context
//! management.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    row_to_checkpoint, row_to_goal, Checkpoint, CheckpointStatus, EvaluationResult, Goal,
    GoalStatus,
};
use crate::llm::{LlmError, LlmRouter, TaskType};
use crate::message::ChatMessage;
use crate::store::{Store, StoreError};

const DECOMPOSE_SYSTEM: &str = "\
<goal_decomposition>
You are the goal planning subsystem. Given a user's goal, decompose it into
3-15 ordered checkpoints. Each checkpoint should be:
- Concrete and actionable (produces a tangible result)
- Independently verifiable (clear success criteria)
- Sequenced logically (dependencies flow left-to-right)

Return ONLY a JSON array. No markdown, no explanation. Each element:
{
  \"order\": <int starting at 1>,
  \"title\": \"<short title, max 60 chars>\",
  \"description\": \"<what to do, 1-3 sentences>\",
  \"success_criteria\": \"<how to verify completion, objective and measurable>\"
}

Guidelines:
- First checkpoint should always be research/information gathering
- Front-load risky or uncertain steps
- Keep each checkpoint achievable in 5-30 tool calls
- Avoid subjective criteria; use measurable ones
</goal_decomposition>";

const SUMMARIZE_SYSTEM: &str = "\
Summarize what was accomplished in this checkpoint execution. Be factual,
concise, and preserve key data points (names, URLs, numbers, decisions made).
Maximum 200 words. Write as numbered points matching checkpoint order.";

const EVALUATE_SYSTEM: &str = "\
<goal_evaluation>
You are evaluating progress on a long-running goal. Given the goal, plan,
completed checkpoints, and context summary, determine:
1. Is the goal still on track?
2. Does the remaining plan need revision based on what was learned?

Return ONLY a JSON object:
{
  \"on_track\": true/false,
  \"revision_needed\": true/false,
  \"reason\": \"<brief explanation>\",
  \"suggested_changes\": \"<what to change, or null>\"
}
</goal_evaluation>";

const REVISE_SYSTEM: &str = "\
<goal_revision>
You are revising the remaining checkpoints for a goal. The completed
checkpoints are fixed; only generate replacement checkpoints for the
remaining (uncompleted) portion of the plan.

Return ONLY a JSON array of new checkpoints (same format as decomposition).
Start ordering from the next checkpoint number after the last completed one.
</goal_revision>";

#[derive(Debug, Error)]
pub enum GoalError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("goal not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Orchestrates goal decomposition, checkpoint tracking, and context
/// management.
pub struct GoalManager {
    store: Store,
    router: Arc<dyn LlmRouter>,
    config: config::GoalsConfig,
}

impl GoalManager {
    pub fn new(store: Store, router: Arc<dyn LlmRouter>, config: config::GoalsConfig) -> Self {
        Self { store, router, config }
    }

    pub fn config(&self) -> &config::GoalsConfig {
        &self.config
    }

    // --- Goal lifecycle ---

    /// Creates a goal in status `planning` and persists it.
    pub async fn create_goal(&self, goal: &str, session_id: Option<&str>) -> Result<Goal, GoalError> {
        let now = Utc::now().to_rfc3339();
        let g = Goal {
            goal_id: Uuid::new_v4().to_string()[..12].to_string(),
            session_id: session_id.map(String::from),
            goal: goal.to_string(),
            status: GoalStatus::Planning,
            plan: Value::Array(vec![]),
            context_summary: String::new(),
            current_checkpoint: 0,
            total_checkpoints: 0,
            attempts: 0,
            max_attempts: self.config.max_goal_attempts as i64,
            llm_calls_used: 0,
            cost_usd: 0.0,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };
        self.persist_goal(&g).await?;
        Ok(g)
    }

    pub async fn get_goal(&self, goal_id: &str) -> Result<Option<Goal>, GoalError> {
        let rows = self
            .store
            .execute("SELECT * FROM goals WHERE goal_id = ?1", vec![json!(goal_id)])
            .await?;
        Ok(rows.first().map(row_to_goal))
    }

    /// The planning/active goal attached to a session, if any.
    pub async fn get_active_goal(&self, session_id: &str) -> Result<Option<Goal>, GoalError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM goals WHERE session_id = ?1 AND status IN ('planning', 'active') \
                 ORDER BY updated_at DESC LIMIT 1",
                vec![json!(session_id)],
            )
            .await?;
        Ok(rows.first().map(row_to_goal))
    }

    pub async fn list_goals(&self, status: Option<&str>, limit: usize) -> Result<Vec<Goal>, GoalError> {
        let rows = match status {
            Some(s) => {
                self.store
                    .execute(
                        "SELECT * FROM goals WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2",
                        vec![json!(s), json!(limit as i64)],
                    )
                    .await?
            }
            None => {
                self.store
                    .execute(
                        "SELECT * FROM goals ORDER BY updated_at DESC LIMIT ?1",
                        vec![json!(limit as i64)],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_goal).collect())
    }

    pub async fn cancel_goal(&self, goal_id: &str) -> Result<bool, GoalError> {
        self.update_status(goal_id, GoalStatus::Cancelled, None).await
    }

    pub async fn pause_goal(&self, goal_id: &str) -> Result<bool, GoalError> {
        self.update_status(goal_id, GoalStatus::Paused, Some(&[GoalStatus::Active, GoalStatus::Planning]))
            .await
    }

    pub async fn resume_goal(&self, goal_id: &str) -> Result<bool, GoalError> {
        self.update_status(goal_id, GoalStatus::Active, Some(&[GoalStatus::Paused]))
            .await
    }

    // --- Planning ---

    /// Decomposes the goal into ordered checkpoints via the LLM and
    /// activates the goal. Returns the persisted checkpoints.
    pub async fn decompose(&self, goal: &mut Goal) -> Result<Vec<Checkpoint>, GoalError> {
        let response = self
            .router
            .complete(
                &[
                    ChatMessage::system(DECOMPOSE_SYSTEM),
                    ChatMessage::user(format!("Decompose this goal into checkpoints: {}", goal.goal)),
                ],
                TaskType::Simple,
                None,
                0.3,
            )
            .await?;
        goal.llm_calls_used += 1;

        let mut checkpoints = parse_checkpoint_json(&response.content, &goal.goal_id);
        if checkpoints.is_empty() {
            warn!(goal = %goal.goal_id, "decomposition returned no checkpoints");
            self.persist_goal(goal).await?;
            return Ok(Vec::new());
        }
        checkpoints.truncate(self.config.max_checkpoints);

        for cp in &checkpoints {
            self.insert_checkpoint(cp).await?;
        }

        goal.status = GoalStatus::Active;
        goal.total_checkpoints = checkpoints.len() as i64;
        goal.current_checkpoint = 1;
        goal.plan = plan_value(&checkpoints);
        goal.updated_at = Utc::now().to_rfc3339();
        self.persist_goal(goal).await?;

        info!(goal = %goal.goal_id, checkpoints = checkpoints.len(), "goal decomposed");
        Ok(checkpoints)
    }

    /// Regenerates the non-completed suffix of the plan. Completed
    /// checkpoints are immutable and their summaries feed the prompt.
    pub async fn revise_plan(&self, goal: &mut Goal, reason: &str) -> Result<Vec<Checkpoint>, GoalError> {
        let completed = self.get_checkpoints(&goal.goal_id, Some(CheckpointStatus::Completed)).await?;
        let completed_summary: Vec<String> = completed
            .iter()
            .map(|c| {
                format!(
                    "[{}] {} -- {}",
                    c.order,
                    c.title,
                    c.result_summary.as_deref().unwrap_or("done")
                )
            })
            .collect();

        let prompt = format!(
            "Goal: {}\nCompleted checkpoints:\n{}\nContext: {}\nReason for revision: {}\n\n\
             Generate revised remaining checkpoints starting from order {}.",
            goal.goal,
            completed_summary.join("\n"),
            goal.context_summary,
            reason,
            goal.current_checkpoint,
        );
        let response = self
            .router
            .complete(
                &[ChatMessage::system(REVISE_SYSTEM), ChatMessage::user(prompt)],
                TaskType::Simple,
                None,
                0.3,
            )
            .await?;
        goal.llm_calls_used += 1;

        let new_checkpoints = parse_checkpoint_json(&response.content, &goal.goal_id);
        if new_checkpoints.is_empty() {
            self.persist_goal(goal).await?;
            return Ok(Vec::new());
        }

        // Completed rows stay; the pending/failed suffix is replaced.
        self.store
            .execute(
                "DELETE FROM goal_checkpoints WHERE goal_id = ?1 AND status IN ('pending', 'failed')",
                vec![json!(goal.goal_id)],
            )
            .await?;
        for cp in &new_checkpoints {
            self.insert_checkpoint(cp).await?;
        }

        let all = self.get_checkpoints(&goal.goal_id, None).await?;
        goal.total_checkpoints = all.len() as i64;
        goal.plan = plan_value(&all);
        goal.updated_at = Utc::now().to_rfc3339();
        self.persist_goal(goal).await?;

        info!(goal = %goal.goal_id, "plan revised: {}", reason);
        Ok(new_checkpoints)
    }

    // --- Checkpoint tracking ---

    pub async fn get_checkpoints(
        &self,
        goal_id: &str,
        status: Option<CheckpointStatus>,
    ) -> Result<Vec<Checkpoint>, GoalError> {
        let rows = match status {
            Some(s) => {
                self.store
                    .execute(
                        "SELECT * FROM goal_checkpoints WHERE goal_id = ?1 AND status = ?2 \
                         ORDER BY checkpoint_order",
                        vec![json!(goal_id), json!(s.as_str())],
                    )
                    .await?
            }
            None => {
                self.store
                    .execute(
                        "SELECT * FROM goal_checkpoints WHERE goal_id = ?1 ORDER BY checkpoint_order",
                        vec![json!(goal_id)],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_checkpoint).collect())
    }

    /// Lowest-ordered pending checkpoint, if any.
    pub async fn get_next_checkpoint(&self, goal_id: &str) -> Result<Option<Checkpoint>, GoalError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM goal_checkpoints WHERE goal_id = ?1 AND status = 'pending' \
                 ORDER BY checkpoint_order LIMIT 1",
                vec![json!(goal_id)],
            )
            .await?;
        Ok(rows.first().map(row_to_checkpoint))
    }

    /// Marks a checkpoint active: sets started_at, bumps attempts.
    pub async fn mark_checkpoint_active(&self, goal_id: &str, order: i64) -> Result<(), GoalError> {
        self.store
            .execute(
                "UPDATE goal_checkpoints SET status = 'active', started_at = ?1, \
                 attempts = attempts + 1 WHERE goal_id = ?2 AND checkpoint_order = ?3",
                vec![json!(Utc::now().to_rfc3339()), json!(goal_id), json!(order)],
            )
            .await?;
        Ok(())
    }

    /// Marks a checkpoint completed and advances the goal: the next pending
    /// order becomes current, or the goal completes when none remain.
    pub async fn mark_checkpoint_complete(
        &self,
        goal_id: &str,
        order: i64,
        summary: &str,
    ) -> Result<(), GoalError> {
        let now = Utc::now().to_rfc3339();
        self.store
            .execute(
                "UPDATE goal_checkpoints SET status = 'completed', result_summary = ?1, \
                 completed_at = ?2 WHERE goal_id = ?3 AND checkpoint_order = ?4",
                vec![json!(summary), json!(now), json!(goal_id), json!(order)],
            )
            .await?;

        let Some(mut goal) = self.get_goal(goal_id).await? else {
            return Ok(());
        };
        match self.get_next_checkpoint(goal_id).await? {
            Some(next) => goal.current_checkpoint = next.order,
            None => {
                goal.status = GoalStatus::Completed;
                goal.completed_at = Some(now.clone());
                goal.current_checkpoint = 0;
            }
        }
        goal.updated_at = now;
        self.persist_goal(&goal).await?;
        Ok(())
    }

    /// Marks a checkpoint failed: resets to pending for retry, or records
    /// the failure and pauses the goal once its attempts are exhausted.
    pub async fn mark_checkpoint_failed(
        &self,
        goal_id: &str,
        order: i64,
        error: &str,
    ) -> Result<(), GoalError> {
        let rows = self
            .store
            .execute(
                "SELECT attempts FROM goal_checkpoints WHERE goal_id = ?1 AND checkpoint_order = ?2",
                vec![json!(goal_id), json!(order)],
            )
            .await?;
        let attempts = rows.first().map(|r| r.i64("attempts")).unwrap_or(0);

        if attempts >= self.config.max_checkpoint_attempts as i64 {
            self.store
                .execute(
                    "UPDATE goal_checkpoints SET status = 'failed', result_summary = ?1 \
                     WHERE goal_id = ?2 AND checkpoint_order = ?3",
                    vec![
                        json!(format!("Failed after {attempts} attempts: {error}")),
                        json!(goal_id),
                        json!(order),
                    ],
                )
                .await?;
            if let Some(mut goal) = self.get_goal(goal_id).await? {
                goal.status = GoalStatus::Paused;
                goal.updated_at = Utc::now().to_rfc3339();
                self.persist_goal(&goal).await?;
            }
        } else {
            self.store
                .execute(
                    "UPDATE goal_checkpoints SET status = 'pending' \
                     WHERE goal_id = ?1 AND checkpoint_order = ?2",
                    vec![json!(goal_id), json!(order)],
                )
                .await?;
        }
        Ok(())
    }

    // --- Context management ---

    /// Compresses the last 20 messages into a bounded rolling summary,
    /// persisted on the goal.
    pub async fn summarize_context(
        &self,
        goal: &mut Goal,
        recent_messages: &[ChatMessage],
    ) -> Result<String, GoalError> {
        let tail = recent_messages.iter().rev().take(20).collect::<Vec<_>>();
        let text_parts: Vec<String> = tail
            .iter()
            .rev()
            .filter(|m| {
                matches!(m.role, crate::message::Role::User | crate::message::Role::Assistant)
                    && !m.content.is_empty()
            })
            .map(|m| {
                let role = match m.role {
                    crate::message::Role::User => "user",
                    _ => "assistant",
                };
                let content: String = m.content.chars().take(500).collect();
                format!("{role}: {content}")
            })
            .collect();
        if text_parts.is_empty() {
            return Ok(goal.context_summary.clone());
        }

        let prompt = format!(
            "Goal: {}\nPrevious context:\n{}\n\nNew checkpoint conversation:\n{}\n\n\
             Summarize the full progress so far.",
            goal.goal,
            goal.context_summary,
            text_parts.join("\n"),
        );
        let response = self
            .router
            .complete(
                &[ChatMessage::system(SUMMARIZE_SYSTEM), ChatMessage::user(prompt)],
                TaskType::Simple,
                None,
                0.2,
            )
            .await?;
        goal.llm_calls_used += 1;

        let mut summary = if response.content.is_empty() {
            goal.context_summary.clone()
        } else {
            response.content
        };
        let max_chars = self.config.context_summary_max_tokens * 4;
        if summary.chars().count() > max_chars {
            summary = summary.chars().take(max_chars).collect();
        }

        goal.context_summary = summary.clone();
        goal.updated_at = Utc::now().to_rfc3339();
        self.persist_goal(goal).await?;
        Ok(summary)
    }

    /// Structured goal block for the system prompt.
    pub async fn build_goal_context(&self, goal_id: &str) -> Result<String, GoalError> {
        let Some(goal) = self.get_goal(goal_id).await? else {
            return Ok(String::new());
        };
        let checkpoints = self.get_checkpoints(goal_id, None).await?;
        let completed: Vec<&Checkpoint> = checkpoints
            .iter()
            .filter(|c| c.status == CheckpointStatus::Completed)
            .collect();
        let remaining: Vec<&Checkpoint> = checkpoints
            .iter()
            .filter(|c| matches!(c.status, CheckpointStatus::Pending | CheckpointStatus::Active))
            .collect();
        let current = remaining.first();

        let mut parts = vec![
            "<active_goal>".to_string(),
            format!("  <goal_id>{}</goal_id>", goal.goal_id),
            format!("  <goal>{}</goal>", goal.goal),
            format!(
                "  <progress>{} of {} checkpoints completed</progress>",
                completed.len(),
                goal.total_checkpoints
            ),
        ];
        if let Some(c) = current {
            parts.push(format!(
                "  <current_checkpoint order=\"{}\" title=\"{}\">",
                c.order, c.title
            ));
            parts.push(format!("    <description>{}</description>", c.description));
            parts.push(format!("    <success_criteria>{}</success_criteria>", c.success_criteria));
            parts.push("  </current_checkpoint>".to_string());
        }
        if !goal.context_summary.is_empty() {
            parts.push(format!("  <context_summary>\n{}\n  </context_summary>", goal.context_summary));
        }
        if !completed.is_empty() {
            parts.push("  <completed_checkpoints>".to_string());
            for c in &completed {
                parts.push(format!(
                    "    <checkpoint order=\"{}\" title=\"{}\" status=\"completed\"/>",
                    c.order, c.title
                ));
            }
            parts.push("  </completed_checkpoints>".to_string());
        }
        if !remaining.is_empty() {
            parts.push("  <remaining_checkpoints>".to_string());
            for c in &remaining {
                parts.push(format!("    <checkpoint order=\"{}\" title=\"{}\"/>", c.order, c.title));
            }
            parts.push("  </remaining_checkpoints>".to_string());
        }
        parts.push("</active_goal>".to_string());
        Ok(parts.join("\n"))
    }

    // --- Self-evaluation and budget ---

    /// Asks the LLM whether the remaining plan still fits. JSON parse
    /// failure returns a conservative "on track, no revision".
    pub async fn evaluate_progress(&self, goal: &mut Goal) -> Result<EvaluationResult, GoalError> {
        let checkpoints = self.get_checkpoints(&goal.goal_id, None).await?;
        let completed_text: Vec<String> = checkpoints
            .iter()
            .filter(|c| c.status == CheckpointStatus::Completed)
            .map(|c| {
                format!(
                    "[{}] {} -- {}",
                    c.order,
                    c.title,
                    c.result_summary.as_deref().unwrap_or("done")
                )
            })
            .collect();
        let remaining_text: Vec<String> = checkpoints
            .iter()
            .filter(|c| matches!(c.status, CheckpointStatus::Pending | CheckpointStatus::Active))
            .map(|c| format!("[{}] {}", c.order, c.title))
            .collect();

        let prompt = format!(
            "Goal: {}\n\nCompleted checkpoints:\n{}\n\nRemaining checkpoints:\n{}\n\n\
             Context summary:\n{}\n\n\
             Evaluate: is this goal on track? Should the remaining plan be revised?",
            goal.goal,
            completed_text.join("\n"),
            remaining_text.join("\n"),
            goal.context_summary,
        );
        let response = self
            .router
            .complete(
                &[ChatMessage::system(EVALUATE_SYSTEM), ChatMessage::user(prompt)],
                TaskType::Simple,
                None,
                0.2,
            )
            .await?;
        goal.llm_calls_used += 1;
        self.persist_goal(goal).await?;

        match serde_json::from_str::<Value>(&response.content) {
            Ok(data) => Ok(EvaluationResult {
                on_track: data.get("on_track").and_then(|v| v.as_bool()).unwrap_or(true),
                revision_needed: data
                    .get("revision_needed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                reason: data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                suggested_changes: data
                    .get("suggested_changes")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            }),
            Err(_) => Ok(EvaluationResult {
                on_track: true,
                revision_needed: false,
                reason: "Could not parse evaluation".to_string(),
                suggested_changes: None,
            }),
        }
    }

    /// LLM-call budget gate: (ok, reason).
    pub fn check_budget(&self, goal: &Goal) -> (bool, String) {
        if goal.llm_calls_used >= self.config.max_llm_calls_per_goal as i64 {
            return (
                false,
                format!("LLM call limit reached ({})", self.config.max_llm_calls_per_goal),
            );
        }
        (true, String::new())
    }

    // --- Persistence helpers ---

    pub(crate) async fn persist_goal(&self, goal: &Goal) -> Result<(), GoalError> {
        self.store
            .execute_insert(
                "INSERT INTO goals (goal_id, session_id, goal, status, plan_json, \
                 context_summary, current_checkpoint, total_checkpoints, attempts, \
                 max_attempts, llm_calls_used, cost_usd, created_at, updated_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
                 ON CONFLICT(goal_id) DO UPDATE SET \
                 status = excluded.status, plan_json = excluded.plan_json, \
                 context_summary = excluded.context_summary, \
                 current_checkpoint = excluded.current_checkpoint, \
                 total_checkpoints = excluded.total_checkpoints, \
                 attempts = excluded.attempts, llm_calls_used = excluded.llm_calls_used, \
                 cost_usd = excluded.cost_usd, updated_at = excluded.updated_at, \
                 completed_at = excluded.completed_at",
                vec![
                    json!(goal.goal_id),
                    goal.session_id.as_ref().map(|s| json!(s)).unwrap_or(Value::Null),
                    json!(goal.goal),
                    json!(goal.status.as_str()),
                    json!(serde_json::to_string(&goal.plan)?),
                    json!(goal.context_summary),
                    json!(goal.current_checkpoint),
                    json!(goal.total_checkpoints),
                    json!(goal.attempts),
                    json!(goal.max_attempts),
                    json!(goal.llm_calls_used),
                    json!(goal.cost_usd),
                    json!(goal.created_at),
                    json!(goal.updated_at),
                    goal.completed_at.as_ref().map(|s| json!(s)).unwrap_or(Value::Null),
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_checkpoint(&self, cp: &Checkpoint) -> Result<(), GoalError> {
        self.store
            .execute_insert(
                "INSERT INTO goal_checkpoints \
                 (goal_id, checkpoint_order, title, description, success_criteria) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                vec![
                    json!(cp.goal_id),
                    json!(cp.order),
                    json!(cp.title),
                    json!(cp.description),
                    json!(cp.success_criteria),
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        goal_id: &str,
        new_status: GoalStatus,
        from: Option<&[GoalStatus]>,
    ) -> Result<bool, GoalError> {
        let Some(mut goal) = self.get_goal(goal_id).await? else {
            return Ok(false);
        };
        if let Some(allowed) = from {
            if !allowed.contains(&goal.status) {
                return Ok(false);
            }
        }
        goal.status = new_status;
        goal.updated_at = Utc::now().to_rfc3339();
        self.persist_goal(&goal).await?;
        Ok(true)
    }
}

fn plan_value(checkpoints: &[Checkpoint]) -> Value {
    Value::Array(
        checkpoints
            .iter()
            .map(|c| {
                json!({
                    "order": c.order,
                    "title": c.title,
                    "description": c.description,
                    "success_criteria": c.success_criteria,
                })
            })
            .collect(),
    )
}

/// Parses LLM output into checkpoints, tolerating fenced code blocks.
/// Titles are truncated to 60 chars; malformed items are skipped.
fn parse_checkpoint_json(raw: &str, goal_id: &str) -> Vec<Checkpoint> {
    let mut text = raw.trim();
    let extracted;
    if text.contains("```") {
        if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
            if start < end {
                extracted = &text[start..=end];
                text = extracted;
            }
        }
    }

    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) else {
        warn!("failed to parse checkpoint JSON: {}", &raw.chars().take(200).collect::<String>());
        return Vec::new();
    };

    let mut checkpoints = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else { continue };
        let title: String = obj
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled")
            .chars()
            .take(60)
            .collect();
        checkpoints.push(Checkpoint {
            goal_id: goal_id.to_string(),
            order: obj
                .get("order")
                .and_then(|v| v.as_i64())
                .unwrap_or(checkpoints.len() as i64 + 1),
            title,
            description: obj
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            success_criteria: obj
                .get("success_criteria")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            status: CheckpointStatus::Pending,
            result_summary: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        });
    }
    checkpoints
}
