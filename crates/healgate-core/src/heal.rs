//! The bounded self-healing loop.
//!
//! Orchestrates one heal run end to end: pick the best GO candidate,
//! set up the branch, apply and commit the patch, push, optionally open
//! a pull request, then verify CI with bounded reruns. Every step lands
//! in an auditable decision trail persisted as a digest-verified report.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::apply::apply_patch_set;
use crate::branch::{attempt_branch_name, rollback_branch, setup_branch, BranchContext, PushMode};
use crate::ci::{verify_commit, CiStatus, CiStatusProvider, VerifyBudget};
use crate::domain::{ContentDigest, HealgateError, Result};
use crate::git;
use crate::pathspec::AllowList;
use crate::redact::{clamp_text, redact_secrets, MAX_EXCERPT_CHARS};
use crate::review::{select_best_go, ReviewedPatch};

// ---------------------------------------------------------------------------
// Policy and report types
// ---------------------------------------------------------------------------

/// Bounds and knobs for one heal run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealPolicy {
    /// Total CI verification attempts, the first one plus reruns.
    pub max_retries: u32,
    /// Safe (branch + PR) or direct push.
    pub push_mode: PushMode,
    /// Remote the healed commit is pushed to.
    pub remote: String,
    /// PR base override; defaults to the branch checked out at start.
    pub base_override: Option<String>,
    /// Open a pull request after pushing in safe mode.
    pub open_pr: bool,
    /// `owner/name` slug used for PR creation.
    pub repo: Option<String>,
    /// Poll budget per verification attempt.
    pub verify: VerifyBudget,
}

impl Default for HealPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            push_mode: PushMode::Safe,
            remote: "origin".to_string(),
            base_override: None,
            open_pr: true,
            repo: None,
            verify: VerifyBudget::default(),
        }
    }
}

/// Heal run final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealOutcome {
    /// CI went green on the healed commit.
    Healed,
    /// Patch landed but CI never settled green within the retry bound.
    Exhausted,
    /// Stopped before any commit reached the repository.
    Aborted,
}

impl std::fmt::Display for HealOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healed => write!(f, "healed"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Step taken during a heal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealAction {
    SelectPatch,
    SetupBranch,
    ApplyPatch,
    Commit,
    Push,
    OpenPr,
    VerifyCi,
    RerunCi,
    Rollback,
}

/// One auditable step in the heal timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealDecision {
    pub attempt: u32,
    pub action: HealAction,
    pub detail: String,
}

/// Full heal run record for artifacts and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealReport {
    pub run_id: String,
    pub policy: HealPolicy,
    pub outcome: HealOutcome,
    pub attempts_used: u32,
    pub selected_patch: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub pr_number: Option<u64>,
    pub touched: Vec<String>,
    pub final_status: Option<CiStatus>,
    pub decisions: Vec<HealDecision>,
    pub evaluated_at: DateTime<Utc>,
}

impl HealReport {
    pub fn healed(&self) -> bool {
        self.outcome == HealOutcome::Healed
    }
}

fn decision(attempt: u32, action: HealAction, detail: impl Into<String>) -> HealDecision {
    HealDecision {
        attempt,
        action,
        detail: detail.into(),
    }
}

/// Fresh run identifier, short enough to double as a branch suffix.
pub fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..8])
}

fn commit_message(files: usize) -> String {
    format!("fix: apply healgate patch ({files} files)")
}

// ---------------------------------------------------------------------------
// Heal loop
// ---------------------------------------------------------------------------

/// Run one bounded heal attempt over already-reviewed candidates.
///
/// Aborts before touching the repository when no candidate carries a GO
/// verdict. A patch that fails to apply on a fresh safe-mode branch
/// rolls the branch back and aborts. Commit and push failures are
/// fatal; a failed pull request is recorded and skipped.
pub async fn run_heal_loop(
    repo_dir: &Path,
    run_id: &str,
    reviewed: &[ReviewedPatch],
    allow_list: &AllowList,
    policy: &HealPolicy,
    provider: &dyn CiStatusProvider,
) -> Result<HealReport> {
    let mut report = HealReport {
        run_id: run_id.to_string(),
        policy: policy.clone(),
        outcome: HealOutcome::Aborted,
        attempts_used: 0,
        selected_patch: None,
        branch: None,
        commit: None,
        pr_number: None,
        touched: Vec::new(),
        final_status: None,
        decisions: Vec::new(),
        evaluated_at: Utc::now(),
    };

    let Some(selected) = select_best_go(reviewed) else {
        report.decisions.push(decision(
            1,
            HealAction::SelectPatch,
            format!("no GO candidate among {} reviewed", reviewed.len()),
        ));
        warn!(run_id = %run_id, "no applicable patch, aborting before any mutation");
        report.evaluated_at = Utc::now();
        return Ok(report);
    };
    report.selected_patch = Some(selected.strategy.id.clone());
    report.decisions.push(decision(
        1,
        HealAction::SelectPatch,
        format!(
            "selected {} ({}, risk {}, slop {:.2})",
            selected.strategy.id,
            selected.strategy.label,
            selected.review.risk_level,
            selected.review.slop_score
        ),
    ));

    let branch_name = attempt_branch_name(run_id);
    let ctx = setup_branch(
        repo_dir,
        policy.push_mode,
        policy.base_override.as_deref(),
        &branch_name,
    )?;
    report.branch = Some(ctx.push_branch.clone());
    report.decisions.push(decision(
        1,
        HealAction::SetupBranch,
        format!("{} (base {})", ctx.push_branch, ctx.base_branch),
    ));

    let applied = match apply_patch_set(repo_dir, allow_list, &selected.strategy.diff, false) {
        Ok(outcome) => outcome,
        Err(e) => {
            report.decisions.push(decision(
                1,
                HealAction::Rollback,
                format!("apply failed: {e}"),
            ));
            rollback_branch(repo_dir, &ctx)?;
            report.branch = None;
            warn!(run_id = %run_id, error = %e, "patch did not apply, branch rolled back");
            report.evaluated_at = Utc::now();
            return Ok(report);
        }
    };
    report.touched = applied.touched.clone();
    report.decisions.push(decision(
        1,
        HealAction::ApplyPatch,
        format!("{} files touched", applied.touched.len()),
    ));

    git::stage(repo_dir, &applied.touched)?;
    let sha = git::commit(repo_dir, &commit_message(applied.touched.len()))?;
    report.commit = Some(sha.clone());
    report
        .decisions
        .push(decision(1, HealAction::Commit, sha[..12.min(sha.len())].to_string()));

    git::push(repo_dir, &policy.remote, &ctx.push_branch)?;
    report.decisions.push(decision(
        1,
        HealAction::Push,
        format!("{} -> {}", ctx.push_branch, policy.remote),
    ));

    if policy.open_pr && !ctx.direct {
        match open_pull_request(policy.repo.as_deref(), run_id, selected, &ctx).await {
            Ok(number) => {
                report.pr_number = Some(number);
                report
                    .decisions
                    .push(decision(1, HealAction::OpenPr, format!("pr #{number}")));
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "pull request creation failed, continuing");
                report
                    .decisions
                    .push(decision(1, HealAction::OpenPr, format!("failed: {e}")));
            }
        }
    }

    let mut final_status = CiStatus::Pending;
    'attempts: for attempt in 1..=policy.max_retries.max(1) {
        report.attempts_used = attempt;

        if attempt > 1 {
            match rerun_failed_workflow(provider, &sha).await {
                Ok(run) => report.decisions.push(decision(
                    attempt,
                    HealAction::RerunCi,
                    format!("re-queued workflow run {run}"),
                )),
                Err(e) => {
                    report.decisions.push(decision(
                        attempt,
                        HealAction::RerunCi,
                        format!("failed: {e}"),
                    ));
                    break 'attempts;
                }
            }
        }

        final_status = verify_commit(provider, &sha, &policy.verify).await?;
        report.decisions.push(decision(
            attempt,
            HealAction::VerifyCi,
            format!("ci {final_status}"),
        ));

        match final_status {
            CiStatus::Passed => break 'attempts,
            CiStatus::Pending => break 'attempts,
            CiStatus::Failed => {}
        }
    }

    report.final_status = Some(final_status);
    report.outcome = if final_status == CiStatus::Passed {
        HealOutcome::Healed
    } else {
        HealOutcome::Exhausted
    };
    report.evaluated_at = Utc::now();

    info!(
        run_id = %run_id,
        outcome = ?report.outcome,
        attempts = report.attempts_used,
        "heal run finished"
    );
    Ok(report)
}

/// Find the workflow run for the healed commit and re-queue it.
async fn rerun_failed_workflow(provider: &dyn CiStatusProvider, sha: &str) -> Result<u64> {
    let run = match provider.run_for_commit(sha).await? {
        Some(run) => run,
        None => provider
            .latest_failed_run()
            .await?
            .ok_or_else(|| HealgateError::CiError("no workflow run found to re-queue".to_string()))?,
    };
    provider.trigger_rerun(run).await?;
    Ok(run)
}

// ---------------------------------------------------------------------------
// Pull request helpers
// ---------------------------------------------------------------------------

fn parse_pr_number(url: &str) -> Option<u64> {
    url.rsplit('/').next().and_then(|s| s.parse::<u64>().ok())
}

fn pull_request_body(run_id: &str, selected: &ReviewedPatch) -> String {
    let mut body = format!(
        "Automated fix for run `{run_id}`.\n\n\
         **Strategy:** {} ({})\n\
         **Risk:** {}\n\
         **Slop score:** {:.2}\n",
        selected.strategy.label,
        selected.strategy.id,
        selected.review.risk_level,
        selected.review.slop_score
    );
    if !selected.review.reasons.is_empty() {
        body.push_str("\n**Review notes:**\n");
        for reason in &selected.review.reasons {
            body.push_str(&format!("- {reason}\n"));
        }
    }
    body
}

/// Create a PR for the pushed branch and return its number.
async fn open_pull_request(
    repo: Option<&str>,
    run_id: &str,
    selected: &ReviewedPatch,
    ctx: &BranchContext,
) -> Result<u64> {
    let repo = repo.ok_or_else(|| {
        HealgateError::CiError("repository slug not configured for pull requests".to_string())
    })?;

    let title = format!("fix: {}", selected.strategy.summary);
    let body = pull_request_body(run_id, selected);
    let output = Command::new("gh")
        .args([
            "pr",
            "create",
            "--repo",
            repo,
            "--title",
            &title,
            "--body",
            &body,
            "--head",
            &ctx.push_branch,
            "--base",
            &ctx.base_branch,
        ])
        .output()
        .await
        .map_err(|e| HealgateError::CiError(format!("failed to run gh pr create: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HealgateError::CiError(format!(
            "gh pr create failed: {}",
            clamp_text(&redact_secrets(stderr.trim()), MAX_EXCERPT_CHARS)
        )));
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_pr_number(&url).ok_or_else(|| {
        HealgateError::CiError(format!("could not parse pull request number from: {url}"))
    })
}

// ---------------------------------------------------------------------------
// Report artifacts
// ---------------------------------------------------------------------------

/// Persist `<dir>/<run_id>/heal_report.json` and `<dir>/<run_id>/heal_report.digest`.
pub fn write_heal_report(report: &HealReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("heal_report.json");
    let digest_path = run_dir.join("heal_report.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentDigest::from_bytes(&json).as_str().to_string();

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/heal_report.json` integrity.
pub fn read_heal_report(run_id: &str, dir: &Path) -> Result<HealReport> {
    let run_dir = dir.join(run_id);
    let artifact_path = run_dir.join("heal_report.json");
    let digest_path = run_dir.join("heal_report.digest");

    let json = std::fs::read(&artifact_path)?;
    let digest = std::fs::read_to_string(&digest_path)?;
    let actual = ContentDigest::from_bytes(&json).as_str().to_string();
    if digest.trim() != actual {
        return Err(HealgateError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
