//! Background checkpoint executor.
//!
//! Owns at most one goal execution task at a time. Each checkpoint runs
//! through the agent loop on a detached history with approvals routed to
//! the event sink; safety gates (user interaction, goal state, LLM budget,
//! wall clock, cost) run before every checkpoint.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wire::EventType;

use super::{Checkpoint, Goal, GoalError, GoalManager, GoalStatus};
use crate::agent::{Agent, RunHooks};
use crate::bus::EventSink;
use crate::message::ChatMessage;
use crate::task::Supervised;
use crate::tools::{ApprovalFn, ApprovalRequest};

const CHECKPOINT_PROMPT: &str = "\
You are autonomously executing a goal checkpoint.

GOAL: {goal}

CURRENT CHECKPOINT ({order} of {total}):
  Title: {title}
  Description: {description}
  Success Criteria: {criteria}

CONTEXT FROM PREVIOUS CHECKPOINTS:
{context}

INSTRUCTIONS:
- Focus ONLY on this checkpoint's objective.
- Use the success criteria to determine when you are done.
- When finished, provide a summary of what was accomplished.";

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Executes goal checkpoints autonomously as one supervised background task.
pub struct GoalRunner {
    agent: Arc<Agent>,
    gm: Arc<GoalManager>,
    sink: Arc<dyn EventSink>,
    config: config::GoalsConfig,
    data_dir: PathBuf,
    stop_requested: AtomicBool,
    current: Mutex<Option<(String, Arc<Supervised>)>>,
}

impl GoalRunner {
    pub fn new(
        agent: Arc<Agent>,
        gm: Arc<GoalManager>,
        sink: Arc<dyn EventSink>,
        config: config::GoalsConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent,
            gm,
            sink,
            config,
            data_dir: data_dir.into(),
            stop_requested: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|(_, task)| task.is_running()))
            .unwrap_or(false)
    }

    pub fn current_goal_id(&self) -> Option<String> {
        if !self.is_running() {
            return None;
        }
        self.current
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|(id, _)| id.clone()))
    }

    /// Launches background execution of a goal. Returns false when a goal is
    /// already running or the goal is not in a startable state.
    pub async fn start_goal(self: &Arc<Self>, goal_id: &str) -> Result<bool, GoalError> {
        if self.is_running() {
            warn!(current = ?self.current_goal_id(), "goal runner already running");
            return Ok(false);
        }
        let Some(goal) = self.gm.get_goal(goal_id).await? else {
            warn!(goal = goal_id, "cannot start goal: not found");
            return Ok(false);
        };
        if !matches!(goal.status, GoalStatus::Active | GoalStatus::Planning) {
            warn!(goal = goal_id, status = goal.status.as_str(), "cannot start goal");
            return Ok(false);
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let runner = Arc::clone(self);
        let id = goal_id.to_string();
        let short = &goal_id[..8.min(goal_id.len())];
        let task = Supervised::spawn(format!("goal-{short}"), move |token| async move {
            runner.run_goal_loop(id, token).await;
        });
        if let Ok(mut current) = self.current.lock() {
            *current = Some((goal_id.to_string(), Arc::new(task)));
        }
        Ok(true)
    }

    /// Requests a pause after the current checkpoint and waits briefly.
    pub async fn pause(&self) {
        if !self.is_running() {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        for _ in 0..50 {
            if !self.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Resumes a paused goal.
    pub async fn resume(self: &Arc<Self>, goal_id: &str) -> Result<bool, GoalError> {
        if self.is_running() {
            return Ok(false);
        }
        if !self.gm.resume_goal(goal_id).await? {
            return Ok(false);
        }
        self.sink
            .broadcast_event(None, EventType::GoalResumed, json!({ "goal_id": goal_id }))
            .await;
        self.start_goal(goal_id).await
    }

    /// Cancels the current execution and clears the mind scratchpad so stale
    /// goal state does not linger.
    pub async fn cancel(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let task = self.current.lock().ok().and_then(|mut c| c.take());
        if let Some((_, task)) = task {
            task.cancel().await;
        }
        crate::mind::clear_scratchpad(&self.data_dir);
    }

    /// Signals that the user sent a message: yield after the current
    /// checkpoint.
    pub fn notify_user_interaction(&self) {
        if self.is_running() {
            info!("user interaction detected, pausing goal after current checkpoint");
            self.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Resumes the most recently updated active goal on startup when
    /// auto_continue is set.
    pub async fn resume_on_startup(self: &Arc<Self>) -> Result<(), GoalError> {
        if !self.config.auto_continue {
            return Ok(());
        }
        let active = self.gm.list_goals(Some("active"), 1).await?;
        if let Some(goal) = active.first() {
            info!(goal = %goal.goal_id, "resuming active goal on startup");
            self.sink
                .broadcast_event(
                    None,
                    EventType::GoalResumed,
                    json!({ "goal_id": goal.goal_id, "goal": goal.goal }),
                )
                .await;
            self.start_goal(&goal.goal_id).await?;
        }
        Ok(())
    }

    async fn run_goal_loop(self: Arc<Self>, goal_id: String, token: CancellationToken) {
        let result = self.goal_loop_inner(&goal_id, &token).await;
        if let Err(e) = result {
            error!(goal = %goal_id, error = %e, "goal execution error");
            self.sink
                .broadcast_event(
                    None,
                    EventType::GoalFailed,
                    json!({ "goal_id": goal_id, "error": e.to_string() }),
                )
                .await;
        }
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    async fn goal_loop_inner(
        &self,
        goal_id: &str,
        token: &CancellationToken,
    ) -> Result<(), GoalError> {
        let Some(goal) = self.gm.get_goal(goal_id).await? else {
            return Ok(());
        };
        let start = Instant::now();
        let mut checkpoints_since_eval = 0u32;

        self.sink
            .broadcast_event(
                None,
                EventType::GoalStarted,
                json!({ "goal_id": goal_id, "goal": goal.goal }),
            )
            .await;

        loop {
            // Safety gates, in order.
            if self.stop_requested.load(Ordering::SeqCst) || token.is_cancelled() {
                self.pause_with_reason(goal_id, "User interaction or pause requested").await?;
                return Ok(());
            }
            let Some(goal) = self.gm.get_goal(goal_id).await? else {
                return Ok(());
            };
            if !matches!(goal.status, GoalStatus::Active | GoalStatus::Planning) {
                return Ok(());
            }
            let (within_budget, reason) = self.gm.check_budget(&goal);
            if !within_budget {
                self.pause_with_reason(goal_id, &format!("Budget limit: {reason}")).await?;
                return Ok(());
            }
            if start.elapsed().as_secs() > self.config.max_total_time_per_goal_seconds {
                self.pause_with_reason(goal_id, "Total time limit reached").await?;
                return Ok(());
            }
            if goal.cost_usd >= self.config.cost_budget_per_goal_usd {
                self.pause_with_reason(goal_id, &format!("Cost limit reached (${:.2})", goal.cost_usd))
                    .await?;
                return Ok(());
            }

            let Some(checkpoint) = self.gm.get_next_checkpoint(goal_id).await? else {
                let refreshed = self.gm.get_goal(goal_id).await?;
                if let Some(goal) = refreshed {
                    if goal.status == GoalStatus::Completed {
                        self.sink
                            .broadcast_event(
                                None,
                                EventType::GoalCompleted,
                                json!({ "goal_id": goal_id, "goal": goal.goal }),
                            )
                            .await;
                    }
                }
                return Ok(());
            };

            let success = self.execute_checkpoint(&goal, &checkpoint).await?;
            if success {
                checkpoints_since_eval += 1;
                self.sink
                    .broadcast_event(
                        None,
                        EventType::GoalCheckpointComplete,
                        json!({
                            "goal_id": goal_id,
                            "checkpoint_order": checkpoint.order,
                            "checkpoint_title": checkpoint.title,
                        }),
                    )
                    .await;
            } else {
                // mark_checkpoint_failed applied the retry/pause policy.
                if let Some(goal) = self.gm.get_goal(goal_id).await? {
                    if goal.status == GoalStatus::Paused {
                        self.sink
                            .broadcast_event(
                                None,
                                EventType::GoalPaused,
                                json!({
                                    "goal_id": goal_id,
                                    "reason": format!(
                                        "Checkpoint {} failed after max retries",
                                        checkpoint.order
                                    ),
                                }),
                            )
                            .await;
                        return Ok(());
                    }
                }
            }

            // Periodic self-evaluation.
            if checkpoints_since_eval >= 2 {
                checkpoints_since_eval = 0;
                if let Some(mut goal) = self.gm.get_goal(goal_id).await? {
                    let evaluation = self.gm.evaluate_progress(&mut goal).await?;
                    if evaluation.revision_needed {
                        info!(goal = %goal_id, reason = %evaluation.reason, "plan needs revision");
                        self.gm.revise_plan(&mut goal, &evaluation.reason).await?;
                    }
                }
            }

            if self.config.pause_between_checkpoints_seconds > 0 {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(
                        self.config.pause_between_checkpoints_seconds,
                    )) => {}
                }
            }
        }
    }

    /// Runs one checkpoint through the agent loop. Returns true on success.
    async fn execute_checkpoint(&self, goal: &Goal, checkpoint: &Checkpoint) -> Result<bool, GoalError> {
        self.gm.mark_checkpoint_active(&goal.goal_id, checkpoint.order).await?;

        let context = if goal.context_summary.is_empty() {
            "(no prior context)"
        } else {
            &goal.context_summary
        };
        let prompt = CHECKPOINT_PROMPT
            .replace("{goal}", &goal.goal)
            .replace("{order}", &checkpoint.order.to_string())
            .replace("{total}", &goal.total_checkpoints.to_string())
            .replace("{title}", &checkpoint.title)
            .replace("{description}", &checkpoint.description)
            .replace("{criteria}", &checkpoint.success_criteria)
            .replace("{context}", context);

        let hooks = RunHooks {
            approval: Some(self.broadcast_approval()),
            ..Default::default()
        };

        let run = tokio::time::timeout(
            Duration::from_secs(self.config.max_time_per_checkpoint_seconds),
            self.agent.run_detached(&prompt, hooks),
        )
        .await;

        match run {
            Ok(response) => {
                let summary: String = response.content.chars().take(500).collect();
                self.gm
                    .mark_checkpoint_complete(&goal.goal_id, checkpoint.order, &summary)
                    .await?;

                if let Some(mut refreshed) = self.gm.get_goal(&goal.goal_id).await? {
                    let messages = [ChatMessage::assistant(response.content.clone())];
                    let _ = self.gm.summarize_context(&mut refreshed, &messages).await;
                }
                Ok(true)
            }
            Err(_) => {
                warn!(
                    goal = %goal.goal_id,
                    order = checkpoint.order,
                    "checkpoint timed out"
                );
                self.gm
                    .mark_checkpoint_failed(&goal.goal_id, checkpoint.order, "Checkpoint timed out")
                    .await?;
                Ok(false)
            }
        }
    }

    /// Approval callback that broadcasts through the sink and awaits the
    /// decision.
    fn broadcast_approval(&self) -> ApprovalFn {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |req: ApprovalRequest| -> BoxFuture<'static, bool> {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.request_approval(
                    None,
                    &req.tool_name,
                    &req.description,
                    req.params,
                    APPROVAL_TIMEOUT,
                )
                .await
            })
        })
    }

    async fn pause_with_reason(&self, goal_id: &str, reason: &str) -> Result<(), GoalError> {
        self.gm.pause_goal(goal_id).await?;
        info!(goal = goal_id, reason, "goal paused");
        self.sink
            .broadcast_event(
                None,
                EventType::GoalPaused,
                json!({ "goal_id": goal_id, "reason": reason }),
            )
            .await;
        Ok(())
    }
}
