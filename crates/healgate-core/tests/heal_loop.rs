//! End-to-end heal runs against throwaway git repositories, a bare
//! "remote", and a scripted CI backend.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use healgate_core::{
    run_heal_loop, AllowList, CiStatus, CiStatusProvider, HealAction, HealOutcome, HealPolicy,
    HealgateError, PatchStrategy, PushMode, QualityReview, Result, ReviewedPatch, RiskTier,
    Verdict, VerifyBudget,
};

fn run(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn capture(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Work tree seeded with `src/config.txt` plus a bare repository wired
/// up as its `origin` remote.
fn init_repo() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let remote = dir.path().join("remote.git");
    std::fs::create_dir_all(&work).unwrap();
    std::fs::create_dir_all(&remote).unwrap();

    run(&remote, &["init", "--bare", "--initial-branch", "main"]);

    run(&work, &["init", "--initial-branch", "main"]);
    run(&work, &["config", "user.name", "test-user"]);
    run(&work, &["config", "user.email", "test@example.com"]);
    std::fs::create_dir_all(work.join("src")).unwrap();
    std::fs::write(work.join("src/config.txt"), "retry = 1\n").unwrap();
    run(&work, &["add", "."]);
    run(&work, &["commit", "-m", "seed"]);
    run(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
    run(&work, &["push", "origin", "main"]);

    (dir, work, remote)
}

const FIX_DIFF: &str = "\
--- a/src/config.txt
+++ b/src/config.txt
@@ -1,1 +1,1 @@
-retry = 1
+retry = 3
";

const CONFLICT_DIFF: &str = "\
--- a/src/config.txt
+++ b/src/config.txt
@@ -1,1 +1,1 @@
-retry = 9
+retry = 3
";

fn go_candidate(diff: &str) -> ReviewedPatch {
    ReviewedPatch {
        strategy: PatchStrategy {
            id: "p-balanced".to_string(),
            label: "balanced".to_string(),
            risk: RiskTier::Low,
            summary: "bump retry budget".to_string(),
            diff: diff.to_string(),
        },
        review: QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Low,
            slop_score: 0.1,
            reasons: Vec::new(),
            suggested_adjustments: Vec::new(),
        },
    }
}

fn no_go_candidate() -> ReviewedPatch {
    ReviewedPatch {
        strategy: PatchStrategy {
            id: "p-aggressive".to_string(),
            label: "aggressive".to_string(),
            risk: RiskTier::High,
            summary: "rewrite the retry module".to_string(),
            diff: CONFLICT_DIFF.to_string(),
        },
        review: QualityReview {
            verdict: Verdict::NoGo,
            risk_level: RiskTier::High,
            slop_score: 1.0,
            reasons: vec!["touches a path outside the allow-list".to_string()],
            suggested_adjustments: Vec::new(),
        },
    }
}

/// Pops one scripted status per poll; an empty script reads as `Pending`.
struct FakeCi {
    statuses: Mutex<VecDeque<CiStatus>>,
    reruns: Mutex<Vec<u64>>,
    rerun_fails: bool,
}

impl FakeCi {
    fn scripted(statuses: &[CiStatus]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            reruns: Mutex::new(Vec::new()),
            rerun_fails: false,
        }
    }
}

#[async_trait]
impl CiStatusProvider for FakeCi {
    async fn commit_status(&self, _sha: &str) -> Result<CiStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CiStatus::Pending))
    }

    async fn latest_failed_run(&self) -> Result<Option<u64>> {
        Ok(Some(7))
    }

    async fn run_for_commit(&self, _sha: &str) -> Result<Option<u64>> {
        Ok(Some(7))
    }

    async fn trigger_rerun(&self, run_id: u64) -> Result<()> {
        if self.rerun_fails {
            return Err(HealgateError::CiError("rerun rejected".to_string()));
        }
        self.reruns.lock().unwrap().push(run_id);
        Ok(())
    }
}

fn fast_policy() -> HealPolicy {
    HealPolicy {
        max_retries: 3,
        push_mode: PushMode::Safe,
        remote: "origin".to_string(),
        base_override: None,
        open_pr: false,
        repo: None,
        verify: VerifyBudget {
            initial_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            max_polls: 2,
        },
    }
}

fn allow_src() -> AllowList {
    AllowList::new(vec!["src/**".to_string()]).unwrap()
}

#[tokio::test]
async fn no_go_candidates_abort_before_any_mutation() {
    let (_dir, work, _remote) = init_repo();
    let head_before = capture(&work, &["rev-parse", "HEAD"]);
    let ci = FakeCi::scripted(&[]);

    let report = run_heal_loop(
        &work,
        "run-nogo",
        &[no_go_candidate()],
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Aborted);
    assert!(report.selected_patch.is_none());
    assert!(report.branch.is_none());
    assert!(report.commit.is_none());
    assert_eq!(report.attempts_used, 0);
    assert_eq!(capture(&work, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(capture(&work, &["branch", "--show-current"]), "main");
    let content = std::fs::read_to_string(work.join("src/config.txt")).unwrap();
    assert_eq!(content, "retry = 1\n");
}

#[tokio::test]
async fn heal_retries_failed_ci_until_it_passes() {
    let (_dir, work, remote) = init_repo();
    let ci = FakeCi::scripted(&[CiStatus::Failed, CiStatus::Passed]);

    let report = run_heal_loop(
        &work,
        "run-heal",
        &[go_candidate(FIX_DIFF)],
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Healed);
    assert!(report.healed());
    assert_eq!(report.attempts_used, 2);
    assert_eq!(report.final_status, Some(CiStatus::Passed));
    assert_eq!(report.touched, vec!["src/config.txt".to_string()]);
    assert_eq!(*ci.reruns.lock().unwrap(), vec![7]);

    let branch = report.branch.clone().unwrap();
    assert_eq!(branch, "heal/run-heal");
    let commit = report.commit.clone().unwrap();
    let remote_sha = capture(&remote, &["rev-parse", &format!("refs/heads/{branch}")]);
    assert_eq!(remote_sha, commit);

    let content = std::fs::read_to_string(work.join("src/config.txt")).unwrap();
    assert_eq!(content, "retry = 3\n");

    let backup = std::fs::read_to_string(work.join("src/config.txt.orig")).unwrap();
    assert_eq!(backup, "retry = 1\n");
    let committed = capture(&work, &["show", "--name-only", "--format=", &commit]);
    assert_eq!(committed, "src/config.txt");
}

#[tokio::test]
async fn failed_apply_rolls_back_the_safe_branch() {
    let (_dir, work, _remote) = init_repo();
    let ci = FakeCi::scripted(&[]);

    let report = run_heal_loop(
        &work,
        "run-conflict",
        &[go_candidate(CONFLICT_DIFF)],
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Aborted);
    assert!(report.commit.is_none());
    assert!(report.branch.is_none());
    assert!(report
        .decisions
        .iter()
        .any(|d| matches!(d.action, HealAction::Rollback)));
    assert_eq!(capture(&work, &["branch", "--show-current"]), "main");
    assert!(capture(&work, &["branch", "--list", "heal/run-conflict"]).is_empty());
    let content = std::fs::read_to_string(work.join("src/config.txt")).unwrap();
    assert_eq!(content, "retry = 1\n");
}

#[tokio::test]
async fn pending_ci_exhausts_the_verify_budget() {
    let (_dir, work, _remote) = init_repo();
    let ci = FakeCi::scripted(&[]);

    let report = run_heal_loop(
        &work,
        "run-pending",
        &[go_candidate(FIX_DIFF)],
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Exhausted);
    assert!(!report.healed());
    assert_eq!(report.final_status, Some(CiStatus::Pending));
    assert_eq!(report.attempts_used, 1);
}

#[tokio::test]
async fn rerun_failure_stops_further_attempts() {
    let (_dir, work, _remote) = init_repo();
    let mut ci = FakeCi::scripted(&[CiStatus::Failed]);
    ci.rerun_fails = true;

    let report = run_heal_loop(
        &work,
        "run-stuck",
        &[go_candidate(FIX_DIFF)],
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Exhausted);
    assert_eq!(report.attempts_used, 2);
    assert_eq!(report.final_status, Some(CiStatus::Failed));
    assert!(ci.reruns.lock().unwrap().is_empty());
}

#[tokio::test]
async fn direct_mode_pushes_the_current_branch() {
    let (_dir, work, remote) = init_repo();
    let ci = FakeCi::scripted(&[CiStatus::Passed]);
    let mut policy = fast_policy();
    policy.push_mode = PushMode::Direct;

    let report = run_heal_loop(
        &work,
        "run-direct",
        &[go_candidate(FIX_DIFF)],
        &allow_src(),
        &policy,
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Healed);
    assert_eq!(report.attempts_used, 1);
    assert_eq!(report.branch.as_deref(), Some("main"));
    let commit = report.commit.clone().unwrap();
    assert_eq!(capture(&remote, &["rev-parse", "refs/heads/main"]), commit);
    assert!(capture(&work, &["branch", "--list", "heal/*"]).is_empty());
}

#[tokio::test]
async fn mixed_batch_applies_only_the_go_candidate() {
    let (_dir, work, _remote) = init_repo();
    let ci = FakeCi::scripted(&[CiStatus::Passed]);
    let candidates = vec![no_go_candidate(), go_candidate(FIX_DIFF)];

    let report = run_heal_loop(
        &work,
        "run-mixed",
        &candidates,
        &allow_src(),
        &fast_policy(),
        &ci,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, HealOutcome::Healed);
    assert_eq!(report.selected_patch.as_deref(), Some("p-balanced"));
    let content = std::fs::read_to_string(work.join("src/config.txt")).unwrap();
    assert_eq!(content, "retry = 3\n");
}
