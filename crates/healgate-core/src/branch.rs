//! Branch setup and rollback for heal attempts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::error::Result;
use crate::git;

/// How a healed commit reaches the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Dedicated branch plus pull request (the default).
    Safe,
    /// Commit directly onto the current branch.
    Direct,
}

impl std::fmt::Display for PushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Branch state for one heal attempt, decided before any file mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    /// Branch the attempt started from; PR base in safe mode.
    pub base_branch: String,
    /// Branch commits are pushed to.
    pub push_branch: String,
    /// Whether this attempt created `push_branch`.
    pub created: bool,
    /// True in direct mode.
    pub direct: bool,
}

/// Deterministic branch name for one heal run.
pub fn attempt_branch_name(run_id: &str) -> String {
    format!("heal/{run_id}")
}

/// Record the base branch and, in safe mode, create and check out the
/// attempt branch.
pub fn setup_branch(
    repo_dir: &Path,
    mode: PushMode,
    base_override: Option<&str>,
    branch_name: &str,
) -> Result<BranchContext> {
    let current = git::current_branch(repo_dir)?;

    match mode {
        PushMode::Direct => Ok(BranchContext {
            base_branch: current.clone(),
            push_branch: current,
            created: false,
            direct: true,
        }),
        PushMode::Safe => {
            let base = base_override.map_or(current, str::to_string);
            git::create_branch(repo_dir, branch_name)?;
            info!(branch = %branch_name, base = %base, "created heal branch");
            Ok(BranchContext {
                base_branch: base,
                push_branch: branch_name.to_string(),
                created: true,
                direct: false,
            })
        }
    }
}

/// Undo a fresh safe-mode branch that received no commits: check the base
/// branch out again and delete the attempt branch.
pub fn rollback_branch(repo_dir: &Path, ctx: &BranchContext) -> Result<()> {
    if !ctx.created {
        return Ok(());
    }
    git::checkout(repo_dir, &ctx.base_branch)?;
    git::delete_branch(repo_dir, &ctx.push_branch)?;
    info!(branch = %ctx.push_branch, "rolled back heal branch");
    Ok(())
}
