//! The core plan-execute-reflect loop, parameterized on its history source.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use super::{append_turn, batch, guard, prompt, Agent, AgentResponse, RunHooks, StepProgress, TaskCompletion};
use crate::knowledge::{KnowledgeHit, KnowledgeStore};
use crate::llm::TaskType;
use crate::memory::{MemoryManager, WorkingMemory};
use crate::message::ChatMessage;
use crate::tools::ExecutionResult;

const DENIAL_SENTINEL: &str = "User denied this tool execution.";

impl Agent {
    /// One task end-to-end against the given history. The history receives
    /// the final user/assistant pair (trimmed to the bound); intermediate
    /// tool traffic stays in the loop's working message list.
    pub(crate) async fn run_with_history(
        &self,
        goal: &str,
        history: &mut Vec<ChatMessage>,
        hooks: &RunHooks,
        memory_session_id: &str,
    ) -> AgentResponse {
        self.router.cost_tracker().reset_task();

        let working_memory = Arc::new(Mutex::new(WorkingMemory::new()));
        // Retrieval is fire-and-forget: it deposits into working memory for
        // the next turn and never blocks this one.
        tokio::spawn(auto_retrieve(
            Arc::clone(&self.knowledge),
            Arc::clone(&self.memory),
            Arc::clone(&working_memory),
            goal.to_string(),
        ));

        // Goal and identity context are fast local reads.
        let mut goal_context = String::new();
        if let Some(goals) = &self.goals {
            if let Ok(active) = goals.list_goals(Some("active"), 1).await {
                if let Some(goal_row) = active.first() {
                    goal_context = goals
                        .build_goal_context(&goal_row.goal_id)
                        .await
                        .unwrap_or_default();
                }
            }
        }
        let mut identity_context = String::new();
        if let Some(identity) = &self.identity {
            identity_context = identity.build_identity_context().await.unwrap_or_default();
        }

        let tools = self.registry.list();
        let knowledge_context = working_memory
            .lock()
            .map(|wm| wm.format_context(2000))
            .unwrap_or_default();
        let system_content = prompt::build_system_prompt(&prompt::PromptParts {
            permission_mode: match self.config.permission_mode {
                config::PermissionMode::Ask => "ask",
                config::PermissionMode::SmartAuto => "smart_auto",
                config::PermissionMode::FullAuto => "full_auto",
            },
            knowledge_context: &knowledge_context,
            tools: &tools,
            goal_context: &goal_context,
            identity_context: &identity_context,
            current_goal: goal,
        });

        let mut messages: Vec<ChatMessage> = history.clone();
        messages.push(ChatMessage::user(goal));

        let hard_limit = self.config.max_steps;
        let window = self.config.stagnation_window.max(1);
        let max_errors = self.config.max_consecutive_errors.max(1);
        let start = Instant::now();

        let mut step: u32 = 0;
        let mut tool_calls_made: Vec<String> = Vec::new();
        let mut recent_calls: Vec<String> = Vec::new();
        let mut consecutive_errors: usize = 0;
        let mut stagnation_reason = String::new();

        while step < hard_limit {
            // Stagnation gates come before the LLM call.
            if let Some(max_time) = self.config.max_time_seconds {
                let elapsed = start.elapsed().as_secs();
                if elapsed > max_time {
                    stagnation_reason = format!("time limit reached ({elapsed}s)");
                    info!(reason = %stagnation_reason, "stopping loop");
                    break;
                }
            }
            if consecutive_errors >= max_errors {
                stagnation_reason = format!("{consecutive_errors} consecutive errors");
                info!(reason = %stagnation_reason, "stopping loop");
                break;
            }
            if recent_calls.len() >= window {
                let tail = &recent_calls[recent_calls.len() - window..];
                if tail.iter().all(|name| name == &tail[0]) {
                    stagnation_reason = format!("repeating {} {} times", tail[0], window);
                    info!(reason = %stagnation_reason, "stopping loop");
                    break;
                }
            }
            step += 1;

            // PLAN.
            let mut llm_messages = Vec::with_capacity(messages.len() + 1);
            llm_messages.push(ChatMessage::system(system_content.clone()));
            llm_messages.extend(messages.iter().cloned());
            let response = match self
                .router
                .complete(&llm_messages, TaskType::Planning, Some(&tools), 0.2)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "planning call failed");
                    return AgentResponse {
                        content: format!("I encountered an error while thinking: {e}"),
                        steps_taken: step,
                        tool_calls_made,
                    };
                }
            };

            // Terminal branch: no tool calls means the task is complete.
            if response.tool_calls.is_empty() {
                let final_content = if response.content.is_empty() {
                    "Task complete.".to_string()
                } else {
                    response.content
                };

                self.spawn_task_memory(
                    memory_session_id,
                    goal,
                    &final_content,
                    "completed",
                    &tool_calls_made,
                );
                if let Some(identity) = &self.identity {
                    let identity = Arc::clone(identity);
                    let goal_owned = goal.to_string();
                    let outcome = final_content.clone();
                    let mut tools_used = tool_calls_made.clone();
                    tools_used.dedup();
                    tokio::spawn(async move {
                        let _ = identity.reflect_on_task(&goal_owned, &outcome, &tools_used).await;
                    });
                }

                append_turn(history, goal, &final_content);

                if let Some(callback) = self.task_complete_callback() {
                    callback(TaskCompletion {
                        goal: goal.to_string(),
                        content: final_content.clone(),
                        steps: step,
                        cost_usd: self.router.cost_tracker().task_cost(),
                    })
                    .await;
                }

                return AgentResponse {
                    content: final_content,
                    steps_taken: step,
                    tool_calls_made,
                };
            }

            // Tool-call branch.
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let groups = batch::group_tool_calls(&response.tool_calls);
            for group in &groups {
                for tc in group {
                    tool_calls_made.push(tc.name().to_string());
                    recent_calls.push(tc.name().to_string());
                    if let Some(on_step) = &hooks.on_step {
                        on_step(StepProgress {
                            step,
                            tool_name: tc.name().to_string(),
                            thought: response.content.clone(),
                            params: tc.parsed_arguments().unwrap_or_else(|_| json!({})),
                        })
                        .await;
                    }
                }

                // Parallel inside a safe batch, sequential otherwise. Results
                // are appended in call order either way.
                let results: Vec<ExecutionResult> = if group.len() > 1 {
                    join_all(group.iter().map(|tc| {
                        self.executor
                            .execute(tc, hooks.approval.as_ref(), hooks.on_tool.as_ref())
                    }))
                    .await
                } else {
                    vec![
                        self.executor
                            .execute(&group[0], hooks.approval.as_ref(), hooks.on_tool.as_ref())
                            .await,
                    ]
                };

                for (tc, exec_result) in group.iter().zip(results) {
                    if exec_result.error.is_some() {
                        consecutive_errors += 1;
                    } else if !exec_result.denied {
                        consecutive_errors = 0;
                    }
                    // Denials leave the error counter untouched: the user said
                    // no, the agent is not stuck.

                    let tool_content = if exec_result.denied {
                        json!({
                            "error": DENIAL_SENTINEL,
                            "suggestion": "Try a different approach or ask the user for guidance.",
                        })
                    } else if let Some(error) = &exec_result.error {
                        json!({ "error": error })
                    } else if let Some(result) = exec_result.result {
                        guard::wrap_tool_result(tc.name(), result)
                    } else {
                        json!({ "error": "No result returned" })
                    };
                    let serialized = serde_json::to_string(&tool_content)
                        .unwrap_or_else(|_| "{\"error\":\"unserializable result\"}".to_string());
                    messages.push(ChatMessage::tool(tc.id.clone(), serialized));
                }
            }
        }

        // Stopped by a gate or the hard step cap.
        let reason = if stagnation_reason.is_empty() {
            format!("safety limit ({step} steps)")
        } else {
            stagnation_reason
        };
        let stopped_msg = format!(
            "Task stopped: {reason} after {step} steps. \
             You can continue by sending a follow-up message."
        );
        self.spawn_task_memory(memory_session_id, goal, "Max steps reached", "incomplete", &tool_calls_made);
        append_turn(history, goal, &stopped_msg);

        AgentResponse {
            content: stopped_msg,
            steps_taken: step,
            tool_calls_made,
        }
    }

    fn spawn_task_memory(
        &self,
        session_id: &str,
        goal: &str,
        summary: &str,
        outcome: &str,
        tools_used: &[String],
    ) {
        let memory = Arc::clone(&self.memory);
        let session_id = session_id.to_string();
        let goal = goal.to_string();
        let summary = summary.to_string();
        let outcome = outcome.to_string();
        let tools_used = tools_used.to_vec();
        tokio::spawn(async move {
            if let Err(e) = memory
                .store_task_memory(&session_id, &goal, &summary, &outcome, &tools_used)
                .await
            {
                warn!(error = %e, "failed to store task memory");
            }
        });
    }
}

/// Background retrieval: knowledge + task-memory search deposited into
/// working memory. Errors are swallowed; retrieval is best-effort.
async fn auto_retrieve(
    knowledge: Arc<KnowledgeStore>,
    memory: Arc<MemoryManager>,
    working_memory: Arc<Mutex<WorkingMemory>>,
    goal: String,
) {
    let mut hits = knowledge.search(&goal, None, 3).await.unwrap_or_default();
    let remembered = memory.search_memory(&goal, 3).await.unwrap_or_default();
    hits.extend(remembered.into_iter().map(|task| KnowledgeHit {
        source: "task-memory".to_string(),
        heading: task.goal,
        content: task.summary,
        score: 0.0,
    }));
    if let Ok(mut wm) = working_memory.lock() {
        wm.add_chunks(hits);
    }
}
