//! Schema DDL and idempotent migrations.
//!
//! Every statement uses `CREATE TABLE IF NOT EXISTS` so initialization can
//! run any number of times. `MIGRATIONS` holds `ALTER TABLE ADD COLUMN`
//! statements for databases created before the column existed; a "duplicate
//! column name" failure means the column is already there and is ignored.

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    channel TEXT NOT NULL,
    user_id TEXT NOT NULL,
    conversation_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    last_active TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE(channel, user_id)
);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    cron_expression TEXT NOT NULL,
    task_goal TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    last_result TEXT,
    last_status TEXT NOT NULL DEFAULT 'never_run',
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schedule_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    result TEXT,
    error TEXT,
    steps_taken INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS goals (
    goal_id TEXT PRIMARY KEY,
    session_id TEXT,
    goal TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'planning',
    plan_json TEXT NOT NULL DEFAULT '[]',
    context_summary TEXT NOT NULL DEFAULT '',
    current_checkpoint INTEGER NOT NULL DEFAULT 0,
    total_checkpoints INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    llm_calls_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS goal_checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    goal_id TEXT NOT NULL REFERENCES goals(goal_id),
    checkpoint_order INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    success_criteria TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    result_summary TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE(goal_id, checkpoint_order)
);

CREATE TABLE IF NOT EXISTS identity (
    id TEXT PRIMARY KEY DEFAULT 'self',
    creator TEXT NOT NULL DEFAULT 'mahout',
    display_name TEXT NOT NULL DEFAULT 'mahout',
    purpose TEXT,
    values_json TEXT NOT NULL DEFAULT '[]',
    beliefs_json TEXT NOT NULL DEFAULT '{}',
    curiosities_json TEXT NOT NULL DEFAULT '[]',
    boundaries_json TEXT NOT NULL DEFAULT '[]',
    capabilities_json TEXT NOT NULL DEFAULT '[]',
    personality_json TEXT NOT NULL DEFAULT '{}',
    communication_style TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identity_evolution (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger TEXT NOT NULL,
    field_changed TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    reason TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS swarm_agents (
    agent_id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    task TEXT NOT NULL,
    branch TEXT NOT NULL,
    worktree_path TEXT NOT NULL,
    host_session TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    done_criteria TEXT NOT NULL DEFAULT 'pr_created',
    pr_url TEXT,
    pr_number INTEGER,
    ci_status TEXT,
    enriched_prompt TEXT,
    spawned_at TEXT NOT NULL,
    completed_at TEXT,
    stopped_reason TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS swarm_activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    event TEXT NOT NULL,
    detail TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    heading_path TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    scope TEXT NOT NULL DEFAULT 'system',
    token_count INTEGER NOT NULL DEFAULT 0,
    file_updated_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    task_goal TEXT NOT NULL,
    task_summary TEXT NOT NULL,
    outcome TEXT NOT NULL DEFAULT 'completed',
    tools_used TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS approval_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tool_name TEXT NOT NULL,
    description TEXT NOT NULL,
    params_json TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_schedule_runs_schedule
    ON schedule_runs(schedule_id, started_at);
CREATE INDEX IF NOT EXISTS idx_goal_checkpoints_goal
    ON goal_checkpoints(goal_id, checkpoint_order);
CREATE INDEX IF NOT EXISTS idx_memory_created
    ON memory(created_at);
"#;

/// ALTER TABLE additions for databases created by earlier schema versions.
/// Safe to re-run: duplicate-column failures are ignored.
pub(crate) const MIGRATIONS: &[&str] = &[
    "ALTER TABLE schedule_runs ADD COLUMN steps_taken INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE swarm_agents ADD COLUMN metadata_json TEXT NOT NULL DEFAULT '{}'",
    "ALTER TABLE sessions ADD COLUMN metadata_json TEXT NOT NULL DEFAULT '{}'",
];
