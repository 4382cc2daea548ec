//! PR platform interface: find an agent's pull request and reduce its CI
//! check states.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::SwarmError;

/// A pull request found for an agent's branch.
#[derive(Clone, Debug)]
pub struct PrInfo {
    pub number: i64,
    pub url: String,
    pub state: String,
}

/// Reduced CI status across all checks of one PR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
    Unknown,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Unknown => "unknown",
        }
    }

    /// Reduces per-check states: all success → success, any failure →
    /// failure, none → pending, otherwise pending.
    pub fn reduce(states: &[String]) -> Self {
        if states.is_empty() {
            return Self::Pending;
        }
        let lowered: Vec<String> = states.iter().map(|s| s.to_lowercase()).collect();
        if lowered.iter().all(|s| s == "success") {
            Self::Success
        } else if lowered.iter().any(|s| s == "failure") {
            Self::Failure
        } else {
            Self::Pending
        }
    }
}

/// Remote PR platform as the monitor sees it.
#[async_trait]
pub trait PrPlatform: Send + Sync {
    /// The PR whose head is `branch`, if one exists.
    async fn find_pr(&self, branch: &str) -> Option<PrInfo>;

    /// Reduced CI status for a PR.
    async fn check_status(&self, pr_number: i64) -> CiStatus;
}

/// `gh` CLI implementation. Transient failures reduce to None/Unknown; the
/// monitor retries next tick.
pub struct GhCli {
    repo_root: std::path::PathBuf,
}

impl GhCli {
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Option<Vec<u8>> {
        let output = Command::new("gh")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            debug!(
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "gh call failed"
            );
            return None;
        }
        Some(output.stdout)
    }
}

#[async_trait]
impl PrPlatform for GhCli {
    async fn find_pr(&self, branch: &str) -> Option<PrInfo> {
        let stdout = self
            .run(&["pr", "list", "--head", branch, "--json", "number,url,state"])
            .await?;
        let prs: Vec<Value> = serde_json::from_slice(&stdout).ok()?;
        let pr = prs.first()?;
        Some(PrInfo {
            number: pr.get("number")?.as_i64()?,
            url: pr.get("url")?.as_str()?.to_string(),
            state: pr.get("state").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        })
    }

    async fn check_status(&self, pr_number: i64) -> CiStatus {
        let Some(stdout) = self
            .run(&["pr", "checks", &pr_number.to_string(), "--json", "name,state"])
            .await
        else {
            return CiStatus::Unknown;
        };
        let Ok(checks) = serde_json::from_slice::<Vec<Value>>(&stdout) else {
            return CiStatus::Unknown;
        };
        let states: Vec<String> = checks
            .iter()
            .filter_map(|c| c.get("state").and_then(|v| v.as_str()).map(String::from))
            .collect();
        CiStatus::reduce(&states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: CI reduction: all green → success, one red → failure,
    /// mixed-in-flight → pending, no checks → pending.
    #[test]
    fn ci_reduction() {
        let s = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(CiStatus::reduce(&s(&["SUCCESS", "success"])), CiStatus::Success);
        assert_eq!(CiStatus::reduce(&s(&["success", "failure"])), CiStatus::Failure);
        assert_eq!(CiStatus::reduce(&s(&["success", "in_progress"])), CiStatus::Pending);
        assert_eq!(CiStatus::reduce(&[]), CiStatus::Pending);
    }
}
