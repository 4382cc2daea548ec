//! Swarm lifecycle against fake process/PR/VCS hosts: spawn, monitor
//! transitions, redirect, timeout, restart survival.

mod support;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mahout::store::Store;
use mahout::swarm::{
    CiStatus, PrInfo, PrPlatform, ProcessHost, SwarmError, SwarmManager, SwarmStatus, VcsHost,
};
use wire::EventType;

use support::RecordingSink;

#[derive(Default)]
struct FakeHost {
    alive: Mutex<HashSet<String>>,
    inputs: Mutex<Vec<(String, String)>>,
}

impl FakeHost {
    fn kill_all(&self) {
        self.alive.lock().unwrap().clear();
    }
}

#[async_trait]
impl ProcessHost for FakeHost {
    async fn launch(&self, session: &str, _workdir: &Path, _command: &str) -> Result<(), SwarmError> {
        self.alive.lock().unwrap().insert(session.to_string());
        Ok(())
    }

    async fn is_alive(&self, session: &str) -> bool {
        self.alive.lock().unwrap().contains(session)
    }

    async fn send_input(&self, session: &str, text: &str) -> Result<(), SwarmError> {
        self.inputs
            .lock()
            .unwrap()
            .push((session.to_string(), text.to_string()));
        Ok(())
    }

    async fn kill(&self, session: &str) -> Result<(), SwarmError> {
        self.alive.lock().unwrap().remove(session);
        Ok(())
    }
}

#[derive(Default)]
struct FakePlatform {
    /// branch → (pr number, ci status).
    prs: Mutex<HashMap<String, (i64, CiStatus)>>,
}

#[async_trait]
impl PrPlatform for FakePlatform {
    async fn find_pr(&self, branch: &str) -> Option<PrInfo> {
        self.prs.lock().unwrap().get(branch).map(|(number, _)| PrInfo {
            number: *number,
            url: format!("https://example.test/pr/{number}"),
            state: "open".to_string(),
        })
    }

    async fn check_status(&self, pr_number: i64) -> CiStatus {
        self.prs
            .lock()
            .unwrap()
            .values()
            .find(|(number, _)| *number == pr_number)
            .map(|(_, ci)| *ci)
            .unwrap_or(CiStatus::Unknown)
    }
}

#[derive(Default)]
struct FakeVcs {
    worktrees: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
    deleted_branches: Mutex<Vec<String>>,
}

#[async_trait]
impl VcsHost for FakeVcs {
    async fn create_worktree(&self, _branch: &str, path: &Path) -> Result<(), SwarmError> {
        std::fs::create_dir_all(path).map_err(|e| SwarmError::Vcs(e.to_string()))?;
        self.worktrees.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), SwarmError> {
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), SwarmError> {
        self.deleted_branches.lock().unwrap().push(branch.to_string());
        Ok(())
    }
}

fn swarm_config() -> config::SwarmConfig {
    let mut profiles = std::collections::BTreeMap::new();
    profiles.insert(
        "codex".to_string(),
        config::AgentProfileConfig {
            command: "codex".to_string(),
            strengths: vec!["refactor".to_string(), "tests".to_string()],
            ..Default::default()
        },
    );
    profiles.insert(
        "scribe".to_string(),
        config::AgentProfileConfig {
            command: "scribe".to_string(),
            strengths: vec!["docs".to_string(), "writing".to_string()],
            done_criteria: Some("ci_passed".to_string()),
            ..Default::default()
        },
    );
    config::SwarmConfig {
        enabled: true,
        max_concurrent_agents: 2,
        profiles,
        ..Default::default()
    }
}

struct Fixture {
    manager: Arc<SwarmManager>,
    host: Arc<FakeHost>,
    platform: Arc<FakePlatform>,
    vcs: Arc<FakeVcs>,
    sink: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

fn fixture_with(config: config::SwarmConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("t.db")).unwrap();
    let host = Arc::new(FakeHost::default());
    let platform = Arc::new(FakePlatform::default());
    let vcs = Arc::new(FakeVcs::default());
    let sink = RecordingSink::new();
    let mut cfg = config;
    cfg.worktree_base_dir = Some(dir.path().join("worktrees").to_string_lossy().into_owned());
    let manager = Arc::new(
        SwarmManager::new(
            store,
            cfg,
            dir.path(),
            sink.clone(),
            host.clone(),
            platform.clone(),
            vcs.clone(),
        )
        .with_prompt_delay(Duration::from_millis(1)),
    );
    Fixture {
        manager,
        host,
        platform,
        vcs,
        sink,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(swarm_config())
}

/// **Scenario**: Spawning creates the worktree and branch, launches the
/// session, types the enriched prompt (with the PR closing line), persists
/// the record, and broadcasts agent_spawned.
#[tokio::test]
async fn spawn_full_pipeline() {
    let f = fixture();
    let agent = f
        .manager
        .spawn("Refactor the parser tests", None, None, "focus on edge cases")
        .await
        .unwrap();

    assert_eq!(agent.profile, "codex", "strengths match selects codex");
    assert!(agent.branch.starts_with("swarm/refactor-the-parser-tests-"));
    assert_eq!(agent.status, SwarmStatus::Running);
    assert!(f.host.is_alive(&agent.host_session).await);

    let inputs = f.host.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].1.contains("Refactor the parser tests"));
    assert!(inputs[0].1.contains("focus on edge cases"));
    assert!(inputs[0].1.contains("gh pr create"));

    assert_eq!(f.vcs.worktrees.lock().unwrap().len(), 1);
    assert_eq!(f.sink.events_of(EventType::AgentSpawned).len(), 1);

    // Explicit profile mention wins selection.
    let doc_agent = f
        .manager
        .spawn("Use scribe to update the README", None, None, "")
        .await
        .unwrap();
    assert_eq!(doc_agent.profile, "scribe");

    // Cap reached.
    let err = f.manager.spawn("third agent", Some("codex"), None, "").await;
    assert!(matches!(err, Err(SwarmError::Config(_))));
}

/// **Scenario**: pr_created criteria: one monitor pass after the PR appears
/// marks the agent completed and broadcasts agent_completed; with green CI
/// the worktree and branch are cleaned up.
#[tokio::test]
async fn monitor_completes_on_pr() {
    let f = fixture();
    let agent = f.manager.spawn("refactor things", Some("codex"), None, "").await.unwrap();

    // No PR yet: still running after a pass.
    f.manager.check_agents().await;
    assert_eq!(f.manager.running_agents().len(), 1);

    f.platform
        .prs
        .lock()
        .unwrap()
        .insert(agent.branch.clone(), (42, CiStatus::Success));
    f.manager.check_agents().await;

    assert!(f.manager.running_agents().is_empty());
    let completed = f.sink.events_of(EventType::AgentCompleted);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["pr_url"], serde_json::json!("https://example.test/pr/42"));
    assert_eq!(f.vcs.removed.lock().unwrap().len(), 1);
    assert_eq!(f.vcs.deleted_branches.lock().unwrap().clone(), vec![agent.branch]);
}

/// **Scenario**: ci_passed criteria: a PR with pending CI stays running; a
/// dead session without done criteria fails the agent.
#[tokio::test]
async fn ci_criteria_and_dead_session() {
    let f = fixture();
    let agent = f
        .manager
        .spawn("write the docs", Some("scribe"), None, "")
        .await
        .unwrap();
    f.platform
        .prs
        .lock()
        .unwrap()
        .insert(agent.branch.clone(), (7, CiStatus::Pending));

    f.manager.check_agents().await;
    assert_eq!(f.manager.running_agents().len(), 1, "pending CI is not done");

    // Session dies while CI is still pending: failure.
    f.host.kill_all();
    f.manager.check_agents().await;
    assert!(f.manager.running_agents().is_empty());
    let failed = f.sink.events_of(EventType::AgentFailed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0]["reason"].as_str().unwrap().contains("exited"));
}

/// **Scenario**: redirect types into the live session; stop_agent kills it
/// and records the reason; a restarted manager reloads running agents from
/// the store.
#[tokio::test]
async fn redirect_stop_and_restart_survival() {
    let f = fixture();
    let agent = f.manager.spawn("refactor module", Some("codex"), None, "").await.unwrap();

    assert!(f.manager.redirect(&agent.agent_id, "also update the changelog").await.unwrap());
    let inputs = f.host.inputs.lock().unwrap().clone();
    assert!(inputs.iter().any(|(_, text)| text.contains("changelog")));

    // Restart: a fresh manager over the same store sees the running agent.
    let store = Store::open(f._dir.path().join("t.db")).unwrap();
    let restarted = Arc::new(
        SwarmManager::new(
            store,
            swarm_config(),
            f._dir.path(),
            f.sink.clone(),
            f.host.clone(),
            f.platform.clone(),
            f.vcs.clone(),
        )
        .with_prompt_delay(Duration::from_millis(1)),
    );
    restarted.start().await.unwrap();
    assert_eq!(restarted.running_agents().len(), 1);
    restarted.stop().await;

    assert!(f.manager.stop_agent(&agent.agent_id, "user request").await.unwrap());
    assert!(!f.host.is_alive(&agent.host_session).await);
    assert_eq!(f.sink.events_of(EventType::AgentStopped).len(), 1);
    // A stopped agent cannot be redirected.
    assert!(!f.manager.redirect(&agent.agent_id, "more").await.unwrap());
}
