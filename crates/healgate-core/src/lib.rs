//! Healgate Core Library
//!
//! Re-exports core components for programmatic access to the patch
//! safety gate and the self-healing loop.

pub mod apply;
pub mod artifacts;
pub mod branch;
pub mod ci;
pub mod diff;
pub mod domain;
pub mod git;
pub mod heal;
pub mod merge;
pub mod obs;
pub mod pathspec;
pub mod redact;
pub mod review;
pub mod scorer;
pub mod telemetry;

pub use domain::{
    ContentDigest, FailureKind, HealgateError, PatchStrategy, QualityReview, Result, RiskTier,
    Verdict,
};

pub use apply::{
    apply_patch_set, backup_file, ensure_path_safe, restore_backups, ApplyOutcome, FileBackup,
};
pub use artifacts::{
    read_candidate_patch, read_patch_index, write_candidate_artifacts, PatchIndex, PatchIndexEntry,
};
pub use branch::{
    attempt_branch_name, rollback_branch, setup_branch, BranchContext, PushMode,
};
pub use ci::{verify_commit, CiStatus, CiStatusProvider, GhStatusProvider, VerifyBudget};
pub use diff::{
    added_lines, file_changes, has_file_deletion, parse_patch, patch_stats, ChangeKind, DiffHunk,
    DiffLine, FileChange, FileDiff,
};
pub use heal::{
    new_run_id, read_heal_report, run_heal_loop, write_heal_report, HealAction, HealDecision,
    HealOutcome, HealPolicy, HealReport,
};
pub use merge::{extract_json_object, merge_reviews, merged_review, normalize_external_review};
pub use pathspec::{glob_match, AllowList};
pub use redact::{clamp_text, redact_secrets, MAX_EXCERPT_CHARS};
pub use review::{
    review_candidate, review_candidates, select_best_go, PatchCandidate, ReviewPool,
    ReviewedPatch,
};
pub use scorer::{
    evaluate_patch, ScorePolicy, ScoreRule, ScoreRuleSet, ScoreSubject, ScoreViolation,
    HIGH_TIER_SCORE, MEDIUM_TIER_SCORE, NO_GO_SCORE,
};

pub use git::{capture_head_sha, current_branch, is_git_repo};

pub use obs::{
    emit_artifact_error, emit_gate_evaluated, emit_heal_finished, emit_heal_started,
    emit_patch_applied, emit_review_completed, RunSpan,
};
pub use telemetry::init_tracing;

/// Healgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
