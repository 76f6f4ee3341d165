//! CI status providers and the bounded verification loop.
//!
//! The `CiStatusProvider` trait abstracts over CI backends so the heal
//! loop can be driven by the GitHub CLI in production and by scripted
//! fakes in tests. `verify_commit` polls a commit's combined status
//! under a fixed time budget and never blocks forever.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::{HealgateError, Result};
use crate::redact::{clamp_text, redact_secrets, MAX_EXCERPT_CHARS};

// ---------------------------------------------------------------------------
// Status model
// ---------------------------------------------------------------------------

/// Combined CI state for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passed,
    Failed,
    Pending,
}

impl std::fmt::Display for CiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Trait for CI status backends (GitHub CLI, scripted fakes, etc.).
#[async_trait]
pub trait CiStatusProvider: Send + Sync {
    /// Combined status for a commit. Unknown or unreachable states
    /// report as `Pending`, never as `Passed`.
    async fn commit_status(&self, sha: &str) -> Result<CiStatus>;

    /// Database ID of the most recent failed workflow run, if any.
    async fn latest_failed_run(&self) -> Result<Option<u64>>;

    /// Database ID of the most recent workflow run for a commit, if any.
    async fn run_for_commit(&self, sha: &str) -> Result<Option<u64>>;

    /// Re-queue a workflow run.
    async fn trigger_rerun(&self, run_id: u64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GitHub CLI provider
// ---------------------------------------------------------------------------

/// CI status provider backed by the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhStatusProvider {
    repo: String,
}

impl GhStatusProvider {
    pub fn new(repo: impl Into<String>) -> Self {
        Self { repo: repo.into() }
    }

    async fn run_gh(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("gh")
            .args(args)
            .output()
            .await
            .map_err(|e| HealgateError::CiError(format!("failed to run gh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HealgateError::CiError(format!(
                "gh {} failed: {}",
                args.first().copied().unwrap_or_default(),
                clamp_text(&redact_secrets(stderr.trim()), MAX_EXCERPT_CHARS)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn first_run_id(&self, extra: &[&str]) -> Result<Option<u64>> {
        let mut args = vec![
            "run",
            "list",
            "--repo",
            &self.repo,
            "--limit",
            "1",
            "--json",
            "databaseId",
            "--jq",
            ".[0].databaseId",
        ];
        args.extend_from_slice(extra);
        let out = self.run_gh(&args).await?;
        Ok(out.parse::<u64>().ok())
    }
}

#[async_trait]
impl CiStatusProvider for GhStatusProvider {
    async fn commit_status(&self, sha: &str) -> Result<CiStatus> {
        let endpoint = format!("repos/{}/commits/{}/status", self.repo, sha);
        let raw = match self.run_gh(&["api", &endpoint]).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(sha = %sha, error = %e, "commit status unavailable, treating as pending");
                return Ok(CiStatus::Pending);
            }
        };

        let state = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("state").and_then(|s| s.as_str()).map(str::to_string));

        Ok(match state.as_deref() {
            Some("success") => CiStatus::Passed,
            Some("failure") | Some("error") => CiStatus::Failed,
            _ => CiStatus::Pending,
        })
    }

    async fn latest_failed_run(&self) -> Result<Option<u64>> {
        self.first_run_id(&["--status", "failure"]).await
    }

    async fn run_for_commit(&self, sha: &str) -> Result<Option<u64>> {
        self.first_run_id(&["--commit", sha]).await
    }

    async fn trigger_rerun(&self, run_id: u64) -> Result<()> {
        let id = run_id.to_string();
        self.run_gh(&["run", "rerun", &id, "--repo", &self.repo])
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bounded verification
// ---------------------------------------------------------------------------

/// Time budget for one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyBudget {
    /// Wait before the first poll, giving CI time to register the push.
    pub initial_delay: Duration,
    /// Wait between polls.
    pub poll_interval: Duration,
    /// Maximum number of polls before giving up.
    pub max_polls: u32,
}

impl Default for VerifyBudget {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(15),
            max_polls: 20,
        }
    }
}

/// Poll a commit's CI status until it settles or the budget runs out.
///
/// Returns `Pending` when the budget is exhausted without a terminal
/// state; the caller decides what an unresolved verification means.
pub async fn verify_commit(
    provider: &dyn CiStatusProvider,
    sha: &str,
    budget: &VerifyBudget,
) -> Result<CiStatus> {
    tokio::time::sleep(budget.initial_delay).await;

    for poll in 1..=budget.max_polls {
        let status = provider.commit_status(sha).await?;
        debug!(sha = %sha, poll = poll, status = %status, "ci poll");

        if status != CiStatus::Pending {
            return Ok(status);
        }
        if poll < budget.max_polls {
            tokio::time::sleep(budget.poll_interval).await;
        }
    }

    Ok(CiStatus::Pending)
}
