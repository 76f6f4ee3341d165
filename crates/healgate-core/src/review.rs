//! Batch candidate review and winner selection.
//!
//! Each candidate patch is scored deterministically, merged with its
//! external review, and the strictest-wins result decides whether the
//! candidate is eligible. Selection picks exactly one winner among GO
//! candidates with a total order, so reruns over the same inputs pick
//! the same patch.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::error::{HealgateError, Result};
use crate::domain::{FailureKind, PatchStrategy, QualityReview};
use crate::merge::merged_review;
use crate::pathspec::AllowList;
use crate::scorer::{evaluate_patch, ScoreRuleSet, ScoreSubject};

/// A patch proposal paired with the raw external review for it, if one
/// was produced.
#[derive(Debug, Clone)]
pub struct PatchCandidate {
    pub strategy: PatchStrategy,
    pub external_review: Option<String>,
}

impl PatchCandidate {
    pub fn new(strategy: PatchStrategy, external_review: Option<String>) -> Self {
        Self {
            strategy,
            external_review,
        }
    }
}

/// A candidate with its final merged review.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReviewedPatch {
    pub strategy: PatchStrategy,
    pub review: QualityReview,
}

/// Concurrency width for batch review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewPool {
    /// Maximum candidates scored at once.
    pub width: usize,
}

impl ReviewPool {
    /// Narrower pool for latency-sensitive callers.
    pub fn fast() -> Self {
        Self { width: 2 }
    }
}

impl Default for ReviewPool {
    fn default() -> Self {
        Self { width: 4 }
    }
}

/// Review one candidate: deterministic score merged with the external
/// review, strictest verdict winning.
pub fn review_candidate(
    rule_set: &ScoreRuleSet,
    allow_list: &AllowList,
    intent: FailureKind,
    candidate: &PatchCandidate,
) -> ReviewedPatch {
    let subject = ScoreSubject {
        intent,
        allow_list,
        diff: &candidate.strategy.diff,
    };
    let deterministic = evaluate_patch(rule_set, &subject);
    let review = merged_review(&deterministic, candidate.external_review.as_deref());

    debug!(
        id = %candidate.strategy.id,
        verdict = %review.verdict,
        risk = %review.risk_level,
        slop = review.slop_score,
        "candidate reviewed"
    );

    ReviewedPatch {
        strategy: candidate.strategy.clone(),
        review,
    }
}

/// Review all candidates in waves of at most `pool.width` concurrent
/// tasks, preserving input order.
pub async fn review_candidates(
    rule_set: &ScoreRuleSet,
    allow_list: &AllowList,
    intent: FailureKind,
    candidates: Vec<PatchCandidate>,
    pool: ReviewPool,
) -> Result<Vec<ReviewedPatch>> {
    let rule_set = Arc::new(rule_set.clone());
    let allow_list = Arc::new(allow_list.clone());
    let width = pool.width.max(1);

    let mut reviewed = Vec::with_capacity(candidates.len());
    let mut queue = candidates.into_iter();
    loop {
        let wave: Vec<PatchCandidate> = queue.by_ref().take(width).collect();
        if wave.is_empty() {
            break;
        }

        let mut tasks: Vec<JoinHandle<ReviewedPatch>> = Vec::with_capacity(wave.len());
        for candidate in wave {
            let rule_set = Arc::clone(&rule_set);
            let allow_list = Arc::clone(&allow_list);
            tasks.push(tokio::spawn(async move {
                review_candidate(&rule_set, &allow_list, intent, &candidate)
            }));
        }
        for task in tasks {
            let result = task
                .await
                .map_err(|e| HealgateError::TaskJoin(format!("candidate review: {e}")))?;
            reviewed.push(result);
        }
    }

    let go_count = reviewed.iter().filter(|r| r.review.is_go()).count();
    info!(
        total = reviewed.len(),
        go = go_count,
        "candidate review complete"
    );

    Ok(reviewed)
}

fn selection_slop(review: &QualityReview) -> f64 {
    if review.slop_score.is_finite() {
        review.slop_score
    } else {
        1.0
    }
}

/// Pick the single best GO candidate: lowest risk tier first, then
/// lowest slop score, then label, lexicographically, as the final
/// tie-break.
pub fn select_best_go(reviewed: &[ReviewedPatch]) -> Option<&ReviewedPatch> {
    reviewed
        .iter()
        .filter(|r| r.review.is_go())
        .min_by(|a, b| {
            a.review
                .risk_level
                .rank()
                .cmp(&b.review.risk_level.rank())
                .then_with(|| {
                    selection_slop(&a.review)
                        .partial_cmp(&selection_slop(&b.review))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.strategy.label.cmp(&b.strategy.label))
        })
}
