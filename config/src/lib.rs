//! Load mahout configuration from a TOML file and apply environment overrides
//! with priority: **existing env > file > defaults**.
//!
//! Every section has serde defaults so a missing file or empty `[section]`
//! yields a fully usable config. A handful of deployment knobs (database
//! path, data dir, gateway host/port) can be overridden via `MAHOUT_*`
//! environment variables without touching the file.

mod sections;

use std::path::Path;

use thiserror::Error;

pub use sections::{
    AgentConfig, AgentProfileConfig, EmailConfig, GatewayConfig, GoalsConfig, LlmBudgetConfig,
    MindConfig, PermissionMode, PermissionsConfig, SchedulerConfig, SwarmConfig,
};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration: one section per subsystem.
#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct MahoutConfig {
    /// Path to the SQLite database file. Overridable via `MAHOUT_DB_PATH`.
    pub db_path: Option<String>,
    /// Data directory for scratchpad.md, mind_actions.log, seen-email state.
    /// Overridable via `MAHOUT_DATA_DIR`.
    pub data_dir: Option<String>,
    pub agent: AgentConfig,
    pub permissions: PermissionsConfig,
    pub gateway: GatewayConfig,
    pub scheduler: SchedulerConfig,
    pub goals: GoalsConfig,
    pub mind: MindConfig,
    pub budget: LlmBudgetConfig,
    pub swarm: SwarmConfig,
    pub email: EmailConfig,
}

impl MahoutConfig {
    /// Parses a TOML string. Missing sections fall back to defaults.
    pub fn from_toml(raw: &str) -> Result<Self, LoadError> {
        let mut cfg: MahoutConfig = toml::from_str(raw)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Loads from a file path; a missing file yields the default config
    /// (env overrides still apply).
    pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str::<MahoutConfig>(&raw)?
            }
            _ => MahoutConfig::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Effective database path.
    pub fn db_path(&self) -> String {
        self.db_path.clone().unwrap_or_else(|| "mahout.db".to_string())
    }

    /// Effective data directory.
    pub fn data_dir(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| "data".to_string())
    }

    // Existing env always wins over the file.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MAHOUT_DB_PATH") {
            self.db_path = Some(v);
        }
        if let Ok(v) = std::env::var("MAHOUT_DATA_DIR") {
            self.data_dir = Some(v);
        }
        if let Ok(v) = std::env::var("MAHOUT_GATEWAY_HOST") {
            self.gateway.host = v;
        }
        if let Ok(v) = std::env::var("MAHOUT_GATEWAY_PORT") {
            if let Ok(port) = v.parse() {
                self.gateway.port = port;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: An empty string parses to the default config with
    /// every documented default in place.
    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = MahoutConfig::from_toml("").unwrap();
        assert_eq!(cfg.agent.max_steps, 500);
        assert_eq!(cfg.gateway.port, 18789);
        assert_eq!(cfg.gateway.approval_timeout_seconds, 300);
        assert_eq!(cfg.goals.max_checkpoints, 15);
        assert_eq!(cfg.mind.budget_pct, 10.0);
        assert_eq!(cfg.swarm.max_concurrent_agents, 3);
        assert_eq!(cfg.db_path(), "mahout.db");
    }

    /// **Scenario**: Sections override selectively; untouched keys keep defaults.
    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = MahoutConfig::from_toml(
            r#"
            db_path = "elsewhere.db"

            [agent]
            max_steps = 50
            permission_mode = "full_auto"

            [swarm.profiles.codex]
            command = "codex"
            strengths = ["refactor", "tests"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.max_steps, 50);
        assert_eq!(cfg.agent.permission_mode, PermissionMode::FullAuto);
        assert_eq!(cfg.agent.max_time_seconds, None);
        assert_eq!(cfg.db_path(), "elsewhere.db");
        let p = cfg.swarm.profiles.get("codex").unwrap();
        assert_eq!(p.command, "codex");
        assert_eq!(p.max_time_seconds, 3600);
    }

    /// **Scenario**: A malformed file surfaces a Parse error instead of
    /// silently defaulting.
    #[test]
    fn malformed_toml_is_a_parse_error() {
        let r = MahoutConfig::from_toml("agent = [[[");
        assert!(matches!(r, Err(LoadError::Parse(_))));
    }

    /// **Scenario**: Loading a nonexistent path yields defaults.
    #[test]
    fn missing_file_yields_defaults() {
        let cfg = MahoutConfig::load(Some(Path::new("/nonexistent/mahout.toml"))).unwrap();
        assert_eq!(cfg.scheduler.tick_seconds, 30);
    }
}
