//! Process and version-control hosts for external agents.
//!
//! Swarm agents run inside detached terminal-multiplexer sessions in git
//! worktrees. Both dependencies sit behind small traits so the monitor can
//! be exercised with fakes.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::SwarmError;

/// Hosts a detached interactive process per agent session.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Starts `command` detached in `workdir` under the session name.
    async fn launch(&self, session: &str, workdir: &Path, command: &str) -> Result<(), SwarmError>;

    /// Whether the session is still alive.
    async fn is_alive(&self, session: &str) -> bool;

    /// Types text (plus Enter) into the session.
    async fn send_input(&self, session: &str, text: &str) -> Result<(), SwarmError>;

    /// Kills the session.
    async fn kill(&self, session: &str) -> Result<(), SwarmError>;
}

/// tmux-backed process host.
pub struct TmuxHost;

async fn run_tmux(args: &[&str]) -> Result<std::process::Output, SwarmError> {
    Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|e| SwarmError::Process(format!("tmux: {e}")))
}

#[async_trait]
impl ProcessHost for TmuxHost {
    async fn launch(&self, session: &str, workdir: &Path, command: &str) -> Result<(), SwarmError> {
        let workdir = workdir.to_string_lossy();
        let output = run_tmux(&["new-session", "-d", "-s", session, "-c", &workdir, command]).await?;
        if !output.status.success() {
            return Err(SwarmError::Process(format!(
                "tmux launch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn is_alive(&self, session: &str) -> bool {
        run_tmux(&["has-session", "-t", session])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn send_input(&self, session: &str, text: &str) -> Result<(), SwarmError> {
        let output = run_tmux(&["send-keys", "-t", session, text, "Enter"]).await?;
        if !output.status.success() {
            return Err(SwarmError::Process(format!(
                "tmux send-keys failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn kill(&self, session: &str) -> Result<(), SwarmError> {
        run_tmux(&["kill-session", "-t", session]).await.map(|_| ())
    }
}

/// Version-control operations for agent isolation.
#[async_trait]
pub trait VcsHost: Send + Sync {
    /// Creates a worktree on a fresh branch.
    async fn create_worktree(&self, branch: &str, path: &Path) -> Result<(), SwarmError>;

    /// Removes a worktree (force).
    async fn remove_worktree(&self, path: &Path) -> Result<(), SwarmError>;

    /// Deletes a local branch.
    async fn delete_branch(&self, branch: &str) -> Result<(), SwarmError>;
}

/// git CLI implementation rooted at the project repository.
pub struct GitCli {
    repo_root: std::path::PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, SwarmError> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .await
            .map_err(|e| SwarmError::Vcs(format!("git: {e}")))
    }
}

#[async_trait]
impl VcsHost for GitCli {
    async fn create_worktree(&self, branch: &str, path: &Path) -> Result<(), SwarmError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SwarmError::Vcs(format!("create worktree base dir: {e}")))?;
        }
        let path = path.to_string_lossy();
        let output = self.run(&["worktree", "add", "-b", branch, &path]).await?;
        if !output.status.success() {
            return Err(SwarmError::Vcs(format!(
                "git worktree add failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), SwarmError> {
        let path = path.to_string_lossy();
        self.run(&["worktree", "remove", &path, "--force"]).await.map(|_| ())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), SwarmError> {
        self.run(&["branch", "-d", branch]).await.map(|_| ())
    }
}
