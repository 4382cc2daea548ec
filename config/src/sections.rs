//! Per-subsystem configuration sections with serde defaults.
//!
//! Defaults mirror the runtime's documented constants (agent step cap 500,
//! approval timeout 300 s, mind budget 10% of the daily cap, ...). Every
//! section derives `Default` through the same default functions serde uses,
//! so `MahoutConfig::default()` and an empty TOML file agree.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Global permission mode for tool execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Only SAFE tools run without approval.
    Ask,
    /// SAFE tools plus tools whose safe-command predicate passes.
    SmartAuto,
    /// Everything runs without approval.
    FullAuto,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on loop iterations per task.
    pub max_steps: u32,
    /// Optional wall-clock limit per task, seconds.
    pub max_time_seconds: Option<u64>,
    pub permission_mode: PermissionMode,
    /// Stagnation window W: stop when the last W tool calls are identical.
    pub stagnation_window: usize,
    /// Stop after this many consecutive tool errors.
    pub max_consecutive_errors: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            max_time_seconds: None,
            permission_mode: PermissionMode::SmartAuto,
            stagnation_window: 8,
            max_consecutive_errors: 5,
        }
    }
}

/// Per-tool overrides and global disables, the file-level equivalent of the
/// original permissions sheet.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// tool name → "auto" | "ask".
    pub tool_overrides: BTreeMap<String, String>,
    pub disabled_tools: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Soft cap on concurrently tracked sessions.
    pub max_sessions: usize,
    /// Soft cap on in-flight approval requests.
    pub max_pending_approvals: usize,
    /// T_app: seconds before an unanswered approval resolves as denied.
    pub approval_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18789,
            max_sessions: 50,
            max_pending_approvals: 32,
            approval_timeout_seconds: 300,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between due-task scans.
    pub tick_seconds: u64,
    pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: 30,
            default_max_retries: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GoalsConfig {
    pub enabled: bool,
    pub max_checkpoints: usize,
    pub max_goal_attempts: u32,
    pub max_checkpoint_attempts: u32,
    pub max_llm_calls_per_goal: u32,
    pub max_time_per_checkpoint_seconds: u64,
    pub max_total_time_per_goal_seconds: u64,
    pub cost_budget_per_goal_usd: f64,
    pub pause_between_checkpoints_seconds: u64,
    /// Resume the most recently updated active goal on startup.
    pub auto_continue: bool,
    pub context_summary_max_tokens: usize,
}

impl Default for GoalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_checkpoints: 15,
            max_goal_attempts: 3,
            max_checkpoint_attempts: 3,
            max_llm_calls_per_goal: 150,
            max_time_per_checkpoint_seconds: 600,
            max_total_time_per_goal_seconds: 4 * 3600,
            cost_budget_per_goal_usd: 5.0,
            pause_between_checkpoints_seconds: 2,
            auto_continue: false,
            context_summary_max_tokens: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MindConfig {
    pub enabled: bool,
    /// Default wakeup interval once warmed up.
    pub wakeup_seconds: u64,
    /// Ceiling for budget/error backoff.
    pub max_wakeup_seconds: u64,
    /// Share of the daily LLM budget reserved for the mind, percent.
    pub budget_pct: f64,
    pub max_rounds_per_wakeup: u32,
    /// Wall-clock limit per think cycle, seconds.
    pub cycle_timeout_seconds: u64,
}

impl Default for MindConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wakeup_seconds: 1800,
            max_wakeup_seconds: 4 * 3600,
            budget_pct: 10.0,
            max_rounds_per_wakeup: 15,
            cycle_timeout_seconds: 300,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmBudgetConfig {
    /// Overall daily LLM spend cap in USD.
    pub daily_limit_usd: f64,
}

impl Default for LlmBudgetConfig {
    fn default() -> Self {
        Self { daily_limit_usd: 1.0 }
    }
}

/// One external coding-agent profile.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentProfileConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Keywords scored against the task text for auto-selection.
    pub strengths: Vec<String>,
    pub max_time_seconds: u64,
    /// Overrides swarm.default_done_criteria when set.
    pub done_criteria: Option<String>,
}

impl Default for AgentProfileConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            strengths: Vec::new(),
            max_time_seconds: 3600,
            done_criteria: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub enabled: bool,
    pub max_concurrent_agents: usize,
    pub monitor_interval_seconds: u64,
    pub tmux_session_prefix: String,
    /// Base directory for worktrees; defaults next to the repository.
    pub worktree_base_dir: Option<String>,
    pub default_done_criteria: String,
    pub prompt_enrichment: bool,
    pub max_enrichment_chunks: usize,
    /// Remove worktree + local branch when an agent completes on green CI.
    pub cleanup_merged_worktrees: bool,
    pub profiles: BTreeMap<String, AgentProfileConfig>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent_agents: 3,
            monitor_interval_seconds: 60,
            tmux_session_prefix: "mahout".to_string(),
            worktree_base_dir: None,
            default_done_criteria: "pr_created".to_string(),
            prompt_enrichment: true,
            max_enrichment_chunks: 5,
            cleanup_merged_worktrees: true,
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub poll_interval_minutes: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_minutes: 5,
        }
    }
}
