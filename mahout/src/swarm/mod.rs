//! Swarm supervision: spawn, monitor, redirect, and stop external coding
//! agents in isolated git worktrees.
//!
//! Each agent gets a feature branch `swarm/<slug>-<id>`, a worktree, and a
//! detached host session running its profile's command; the enriched prompt
//! is typed into the session after a short settle delay. A periodic monitor
//! probes liveness, the remote PR, and CI, evaluates the profile's done
//! criteria, and enforces wall-clock timeouts. Agent rows survive restarts
//! and monitoring resumes from the store.

mod github;
mod host;

pub use github::{CiStatus, GhCli, PrInfo, PrPlatform};
pub use host::{GitCli, ProcessHost, TmuxHost, VcsHost};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wire::EventType;

use crate::bus::EventSink;
use crate::knowledge::KnowledgeStore;
use crate::store::{Row, Store, StoreError};
use crate::task::Supervised;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("process host: {0}")]
    Process(String),
    #[error("version control: {0}")]
    Vcs(String),
    #[error("{0}")]
    Config(String),
}

/// Swarm agent lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwarmStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "stopped" => Self::Stopped,
            _ => Self::Running,
        }
    }
}

/// A running or finished external agent.
#[derive(Clone, Debug)]
pub struct SwarmAgent {
    pub agent_id: String,
    pub profile: String,
    pub task: String,
    pub branch: String,
    pub worktree_path: String,
    pub host_session: String,
    pub status: SwarmStatus,
    pub done_criteria: String,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub ci_status: Option<String>,
    pub enriched_prompt: String,
    pub spawned_at: String,
    pub completed_at: Option<String>,
    pub stopped_reason: Option<String>,
}

fn row_to_agent(row: &Row) -> SwarmAgent {
    SwarmAgent {
        agent_id: row.str("agent_id"),
        profile: row.str("profile"),
        task: row.str("task"),
        branch: row.str("branch"),
        worktree_path: row.str("worktree_path"),
        host_session: row.str("host_session"),
        status: SwarmStatus::parse(&row.str("status")),
        done_criteria: row.str("done_criteria"),
        pr_url: row.opt_str("pr_url"),
        pr_number: row.opt_i64("pr_number"),
        ci_status: row.opt_str("ci_status"),
        enriched_prompt: row.str("enriched_prompt"),
        spawned_at: row.str("spawned_at"),
        completed_at: row.opt_str("completed_at"),
        stopped_reason: row.opt_str("stopped_reason"),
    }
}

/// Supervises external coding agents.
pub struct SwarmManager {
    store: Store,
    config: config::SwarmConfig,
    project_root: PathBuf,
    sink: Arc<dyn EventSink>,
    host: Arc<dyn ProcessHost>,
    platform: Arc<dyn PrPlatform>,
    vcs: Arc<dyn VcsHost>,
    knowledge: Option<Arc<KnowledgeStore>>,
    agents: Mutex<HashMap<String, SwarmAgent>>,
    monitor: Mutex<Option<Arc<Supervised>>>,
    /// Delay between launching the session and typing the prompt.
    prompt_delay: Duration,
}

impl SwarmManager {
    pub fn new(
        store: Store,
        config: config::SwarmConfig,
        project_root: impl Into<PathBuf>,
        sink: Arc<dyn EventSink>,
        host: Arc<dyn ProcessHost>,
        platform: Arc<dyn PrPlatform>,
        vcs: Arc<dyn VcsHost>,
    ) -> Self {
        Self {
            store,
            config,
            project_root: project_root.into(),
            sink,
            host,
            platform,
            vcs,
            knowledge: None,
            agents: Mutex::new(HashMap::new()),
            monitor: Mutex::new(None),
            prompt_delay: Duration::from_secs(2),
        }
    }

    /// Attaches the knowledge store for prompt enrichment (builder).
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Overrides the prompt settle delay (builder; tests use a short one).
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .ok()
            .and_then(|m| m.as_ref().map(|t| t.is_running()))
            .unwrap_or(false)
    }

    pub fn running_agents(&self) -> Vec<SwarmAgent> {
        self.agents
            .lock()
            .map(|agents| {
                agents
                    .values()
                    .filter(|a| a.status == SwarmStatus::Running)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reloads persisted running agents and starts the background monitor.
    pub async fn start(self: &Arc<Self>) -> Result<(), SwarmError> {
        self.reload_from_store().await?;
        if self.is_monitoring() {
            return Ok(());
        }
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(self.config.monitor_interval_seconds.max(1));
        let task = Supervised::spawn("swarm-monitor", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                manager.check_agents().await;
            }
        });
        if let Ok(mut slot) = self.monitor.lock() {
            *slot = Some(Arc::new(task));
        }
        info!(
            interval = self.config.monitor_interval_seconds,
            running = self.running_agents().len(),
            "swarm monitor started"
        );
        Ok(())
    }

    /// Stops the monitor. Running agents keep running.
    pub async fn stop(&self) {
        let task = self.monitor.lock().ok().and_then(|mut m| m.take());
        if let Some(task) = task {
            task.cancel().await;
        }
        info!("swarm monitor stopped");
    }

    // --- Spawning -----------------------------------------------------------

    /// Spawns a new external agent: profile selection, worktree, enriched
    /// prompt, host session, persistence, broadcast.
    pub async fn spawn(
        &self,
        task: &str,
        profile_name: Option<&str>,
        branch_name: Option<&str>,
        extra_context: &str,
    ) -> Result<SwarmAgent, SwarmError> {
        if self.running_agents().len() >= self.config.max_concurrent_agents {
            return Err(SwarmError::Config(format!(
                "max concurrent agents ({}) reached, stop a running agent first",
                self.config.max_concurrent_agents
            )));
        }

        let profile_name = match profile_name {
            Some(name) => name.to_string(),
            None => self.auto_select_profile(task),
        };
        let Some(profile) = self.config.profiles.get(&profile_name).cloned() else {
            let available: Vec<&str> = self.config.profiles.keys().map(String::as_str).collect();
            return Err(SwarmError::Config(format!(
                "unknown agent profile: {profile_name}. Available: {}",
                if available.is_empty() { "none configured".to_string() } else { available.join(", ") }
            )));
        };

        let agent_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let branch = match branch_name {
            Some(b) => b.to_string(),
            None => {
                let slug: String = slugify(task).chars().take(40).collect();
                format!("swarm/{slug}-{agent_id}")
            }
        };

        let worktree_path = self.worktree_path_for(&branch);
        self.vcs.create_worktree(&branch, &worktree_path).await?;

        let enriched_prompt = self.build_enriched_prompt(task, extra_context).await;
        tokio::fs::write(worktree_path.join(".agent-prompt.md"), &enriched_prompt)
            .await
            .map_err(|e| SwarmError::Process(format!("write prompt file: {e}")))?;

        let host_session = format!("{}-{agent_id}", self.config.tmux_session_prefix);
        let mut command = String::new();
        for (k, v) in &profile.env {
            command.push_str(&format!("{k}={v} "));
        }
        command.push_str(&profile.command);
        for arg in &profile.args {
            command.push(' ');
            command.push_str(arg);
        }
        self.host.launch(&host_session, &worktree_path, command.trim()).await?;

        // Give the agent CLI a moment to start, then type the prompt.
        tokio::time::sleep(self.prompt_delay).await;
        self.host.send_input(&host_session, &enriched_prompt).await?;

        let agent = SwarmAgent {
            agent_id: agent_id.clone(),
            profile: profile_name.clone(),
            task: task.to_string(),
            branch,
            worktree_path: worktree_path.to_string_lossy().into_owned(),
            host_session,
            status: SwarmStatus::Running,
            done_criteria: profile
                .done_criteria
                .unwrap_or_else(|| self.config.default_done_criteria.clone()),
            pr_url: None,
            pr_number: None,
            ci_status: None,
            enriched_prompt,
            spawned_at: Utc::now().to_rfc3339(),
            completed_at: None,
            stopped_reason: None,
        };

        self.persist_agent(&agent).await?;
        self.log_activity(&agent_id, "spawned", &format!("profile: {profile_name}")).await?;
        if let Ok(mut agents) = self.agents.lock() {
            agents.insert(agent_id.clone(), agent.clone());
        }

        self.sink
            .broadcast_event(
                None,
                EventType::AgentSpawned,
                json!({
                    "agent_id": agent.agent_id,
                    "profile": agent.profile,
                    "task": clip(&agent.task, 200),
                    "branch": agent.branch,
                    "host_session": agent.host_session,
                }),
            )
            .await;
        Ok(agent)
    }

    /// Types new instructions into a running agent's session.
    pub async fn redirect(&self, agent_id: &str, instructions: &str) -> Result<bool, SwarmError> {
        let Some(agent) = self.get_agent(agent_id) else {
            return Ok(false);
        };
        if agent.status != SwarmStatus::Running {
            return Ok(false);
        }
        self.host.send_input(&agent.host_session, instructions).await?;
        self.log_activity(agent_id, "redirected", &clip(instructions, 500)).await?;
        self.sink
            .broadcast_event(
                None,
                EventType::AgentRedirected,
                json!({ "agent_id": agent_id, "instructions": clip(instructions, 200) }),
            )
            .await;
        Ok(true)
    }

    /// Kills a running agent's session and marks it stopped.
    pub async fn stop_agent(&self, agent_id: &str, reason: &str) -> Result<bool, SwarmError> {
        let Some(mut agent) = self.get_agent(agent_id) else {
            return Ok(false);
        };
        if agent.status != SwarmStatus::Running {
            return Ok(false);
        }
        let _ = self.host.kill(&agent.host_session).await;

        agent.status = SwarmStatus::Stopped;
        agent.stopped_reason = Some(reason.to_string());
        agent.completed_at = Some(Utc::now().to_rfc3339());
        self.update_agent(&agent).await?;
        self.log_activity(agent_id, "stopped", reason).await?;
        self.sink
            .broadcast_event(
                None,
                EventType::AgentStopped,
                json!({ "agent_id": agent_id, "reason": reason }),
            )
            .await;
        Ok(true)
    }

    /// Status of one or all agents, newest first, with live session probes.
    pub async fn status(&self, agent_id: Option<&str>) -> Vec<serde_json::Value> {
        let mut agents: Vec<SwarmAgent> = match agent_id {
            Some(id) => self.get_agent(id).into_iter().collect(),
            None => self
                .agents
                .lock()
                .map(|a| a.values().cloned().collect())
                .unwrap_or_default(),
        };
        agents.sort_by(|a, b| b.spawned_at.cmp(&a.spawned_at));

        let mut out = Vec::with_capacity(agents.len());
        for agent in agents {
            let alive = self.host.is_alive(&agent.host_session).await;
            out.push(json!({
                "agent_id": agent.agent_id,
                "profile": agent.profile,
                "task": clip(&agent.task, 100),
                "branch": agent.branch,
                "status": agent.status.as_str(),
                "session_alive": alive,
                "pr_url": agent.pr_url,
                "ci_status": agent.ci_status,
                "spawned_at": agent.spawned_at,
                "completed_at": agent.completed_at,
            }));
        }
        out
    }

    // --- Profile selection --------------------------------------------------

    /// Scores profile strengths as substrings of the lowered task; an
    /// explicit profile-name mention adds a large bonus.
    fn auto_select_profile(&self, task: &str) -> String {
        let task_lower = task.to_lowercase();
        let mut best = String::new();
        let mut best_score = -1i64;

        for (name, profile) in &self.config.profiles {
            let mut score: i64 = profile
                .strengths
                .iter()
                .filter(|s| task_lower.contains(&s.to_lowercase()))
                .count() as i64;
            if task_lower.contains(&name.replace('-', " ")) || task_lower.contains(name.as_str()) {
                score += 10;
            }
            if score > best_score {
                best_score = score;
                best = name.clone();
            }
        }
        if best.is_empty() {
            if let Some(first) = self.config.profiles.keys().next() {
                best = first.clone();
            }
        }
        best
    }

    // --- Monitoring ---------------------------------------------------------

    /// One monitor pass over all running agents.
    pub async fn check_agents(&self) {
        for agent in self.running_agents() {
            if let Err(e) = self.check_single_agent(agent).await {
                debug!(error = %e, "agent check failed");
            }
        }
    }

    async fn check_single_agent(&self, mut agent: SwarmAgent) -> Result<(), SwarmError> {
        let alive = self.host.is_alive(&agent.host_session).await;

        if let Some(pr) = self.platform.find_pr(&agent.branch).await {
            agent.pr_url = Some(pr.url);
            agent.pr_number = Some(pr.number);
            let ci = self.platform.check_status(pr.number).await;
            agent.ci_status = Some(ci.as_str().to_string());
        }

        let done = match agent.done_criteria.as_str() {
            "ci_passed" => agent.ci_status.as_deref() == Some("success"),
            _ => agent.pr_url.is_some(),
        };

        if !alive && !done {
            agent.status = SwarmStatus::Failed;
            agent.completed_at = Some(Utc::now().to_rfc3339());
            agent.stopped_reason =
                Some("host session exited without meeting done criteria".to_string());
            self.update_agent(&agent).await?;
            self.log_activity(&agent.agent_id, "failed", "session exited early").await?;
            self.sink
                .broadcast_event(
                    None,
                    EventType::AgentFailed,
                    json!({
                        "agent_id": agent.agent_id,
                        "task": clip(&agent.task, 200),
                        "reason": agent.stopped_reason,
                    }),
                )
                .await;
            return Ok(());
        }

        if done {
            agent.status = SwarmStatus::Completed;
            agent.completed_at = Some(Utc::now().to_rfc3339());
            self.update_agent(&agent).await?;
            self.log_activity(&agent.agent_id, "completed", agent.pr_url.as_deref().unwrap_or(""))
                .await?;
            self.sink
                .broadcast_event(
                    None,
                    EventType::AgentCompleted,
                    json!({
                        "agent_id": agent.agent_id,
                        "task": clip(&agent.task, 200),
                        "profile": agent.profile,
                        "pr_url": agent.pr_url,
                        "ci_status": agent.ci_status,
                        "branch": agent.branch,
                    }),
                )
                .await;
            if self.config.cleanup_merged_worktrees && agent.ci_status.as_deref() == Some("success") {
                let _ = self.vcs.remove_worktree(Path::new(&agent.worktree_path)).await;
                let _ = self.vcs.delete_branch(&agent.branch).await;
                self.log_activity(&agent.agent_id, "cleanup", "worktree removed").await?;
            }
            return Ok(());
        }

        // Wall-clock timeout per profile.
        let max_time = self
            .config
            .profiles
            .get(&agent.profile)
            .map(|p| p.max_time_seconds)
            .unwrap_or(3600);
        let elapsed = DateTime::parse_from_rfc3339(&agent.spawned_at)
            .map(|t| (Utc::now() - t.with_timezone(&Utc)).num_seconds())
            .unwrap_or(0);
        if elapsed > max_time as i64 {
            warn!(agent = %agent.agent_id, "agent timed out");
            self.stop_agent(&agent.agent_id, "timeout").await?;
            return Ok(());
        }

        // Persist any pr_url/ci_status progress.
        self.update_agent(&agent).await?;
        Ok(())
    }

    // --- Prompt enrichment --------------------------------------------------

    async fn build_enriched_prompt(&self, task: &str, extra_context: &str) -> String {
        let mut sections = vec![task.to_string()];
        if !extra_context.is_empty() {
            sections.push(format!("\nAdditional context:\n{extra_context}"));
        }
        if self.config.prompt_enrichment {
            if let Some(knowledge) = &self.knowledge {
                let hits = knowledge
                    .search(task, None, self.config.max_enrichment_chunks)
                    .await
                    .unwrap_or_default();
                if !hits.is_empty() {
                    let chunks: Vec<String> = hits
                        .iter()
                        .map(|h| format!("[{}] {}", h.source, clip(&h.content, 500)))
                        .collect();
                    sections.push(format!("\nRelevant project knowledge:\n{}", chunks.join("\n---\n")));
                }
            }
        }
        sections.push(
            "\nYou are working in a git worktree on a feature branch. \
             Create a PR when done using `gh pr create`."
                .to_string(),
        );
        sections.join("\n")
    }

    fn worktree_path_for(&self, branch: &str) -> PathBuf {
        let base = match &self.config.worktree_base_dir {
            Some(dir) => PathBuf::from(dir),
            None => self
                .project_root
                .parent()
                .unwrap_or(&self.project_root)
                .join(".mahout-worktrees"),
        };
        base.join(branch.replace('/', "-"))
    }

    // --- Persistence --------------------------------------------------------

    fn get_agent(&self, agent_id: &str) -> Option<SwarmAgent> {
        self.agents.lock().ok().and_then(|a| a.get(agent_id).cloned())
    }

    async fn update_agent(&self, agent: &SwarmAgent) -> Result<(), SwarmError> {
        self.persist_agent(agent).await?;
        if let Ok(mut agents) = self.agents.lock() {
            agents.insert(agent.agent_id.clone(), agent.clone());
        }
        Ok(())
    }

    async fn persist_agent(&self, agent: &SwarmAgent) -> Result<(), SwarmError> {
        self.store
            .execute_insert(
                "INSERT INTO swarm_agents \
                 (agent_id, profile, task, branch, worktree_path, host_session, status, \
                  done_criteria, pr_url, pr_number, ci_status, enriched_prompt, spawned_at, \
                  completed_at, stopped_reason) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
                 ON CONFLICT(agent_id) DO UPDATE SET \
                 status = excluded.status, pr_url = excluded.pr_url, \
                 pr_number = excluded.pr_number, ci_status = excluded.ci_status, \
                 completed_at = excluded.completed_at, stopped_reason = excluded.stopped_reason",
                vec![
                    json!(agent.agent_id),
                    json!(agent.profile),
                    json!(agent.task),
                    json!(agent.branch),
                    json!(agent.worktree_path),
                    json!(agent.host_session),
                    json!(agent.status.as_str()),
                    json!(agent.done_criteria),
                    opt(&agent.pr_url),
                    agent.pr_number.map(|n| json!(n)).unwrap_or(serde_json::Value::Null),
                    opt(&agent.ci_status),
                    json!(agent.enriched_prompt),
                    json!(agent.spawned_at),
                    opt(&agent.completed_at),
                    opt(&agent.stopped_reason),
                ],
            )
            .await?;
        Ok(())
    }

    async fn log_activity(&self, agent_id: &str, event: &str, detail: &str) -> Result<(), SwarmError> {
        self.store
            .execute_insert(
                "INSERT INTO swarm_activity_log (agent_id, event, detail, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                vec![
                    json!(agent_id),
                    json!(event),
                    json!(detail),
                    json!(Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn reload_from_store(&self) -> Result<(), SwarmError> {
        let rows = self
            .store
            .execute("SELECT * FROM swarm_agents WHERE status = 'running'", vec![])
            .await?;
        if rows.is_empty() {
            return Ok(());
        }
        if let Ok(mut agents) = self.agents.lock() {
            for row in &rows {
                let agent = row_to_agent(row);
                agents.insert(agent.agent_id.clone(), agent);
            }
        }
        info!(count = rows.len(), "reloaded running swarm agents from store");
        Ok(())
    }
}

fn opt(value: &Option<String>) -> serde_json::Value {
    value.as_ref().map(|v| json!(v)).unwrap_or(serde_json::Value::Null)
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Lowercased alphanumeric-and-dash slug for branch names.
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Slugs are lowercase alphanumeric with single dashes.
    #[test]
    fn slugify_branch_names() {
        assert_eq!(slugify("Fix the JSON parser!"), "fix-the-json-parser");
        assert_eq!(slugify("  spaces   everywhere  "), "spaces-everywhere");
        assert_eq!(slugify("émoji ☂ bits"), "moji-bits");
    }
}
