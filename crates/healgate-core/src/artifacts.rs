//! Per-run artifact layout for patch candidates.
//!
//! Every run gets its own directory under the artifacts root:
//!
//! - `<dir>/<run_id>/fix.<id>.patch` raw diff per candidate
//! - `<dir>/<run_id>/quality_review.<id>.json` merged review per candidate
//! - `<dir>/<run_id>/patch_index.json` index over all candidates
//! - `<dir>/<run_id>/patch_index.digest` integrity digest for the index

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ContentDigest, HealgateError, Result, RiskTier, Verdict};
use crate::review::ReviewedPatch;

/// One row of `patch_index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchIndexEntry {
    pub id: String,
    pub label: String,
    pub summary: String,
    pub verdict: Verdict,
    pub risk_level: RiskTier,
    pub slop_score: f64,
    /// Patch file name, relative to the run directory.
    pub patch_path: String,
}

/// Index over all reviewed candidates of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchIndex {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<PatchIndexEntry>,
}

fn run_dir(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(run_id)
}

/// Persist per-candidate patches and reviews plus the run index.
pub fn write_candidate_artifacts(
    run_id: &str,
    dir: &Path,
    reviewed: &[ReviewedPatch],
) -> Result<PatchIndex> {
    let run_dir = run_dir(dir, run_id);
    std::fs::create_dir_all(&run_dir)?;

    let mut results = Vec::with_capacity(reviewed.len());
    for patch in reviewed {
        let patch_name = format!("fix.{}.patch", patch.strategy.id);
        let review_name = format!("quality_review.{}.json", patch.strategy.id);

        std::fs::write(run_dir.join(&patch_name), patch.strategy.diff.as_bytes())?;
        std::fs::write(
            run_dir.join(&review_name),
            serde_json::to_vec_pretty(&patch.review)?,
        )?;

        results.push(PatchIndexEntry {
            id: patch.strategy.id.clone(),
            label: patch.strategy.label.clone(),
            summary: patch.strategy.summary.clone(),
            verdict: patch.review.verdict,
            risk_level: patch.review.risk_level,
            slop_score: patch.review.slop_score,
            patch_path: patch_name,
        });
    }

    let index = PatchIndex {
        generated_at: Utc::now(),
        results,
    };

    let json = serde_json::to_vec_pretty(&index)?;
    let digest = ContentDigest::from_bytes(&json).as_str().to_string();
    std::fs::write(run_dir.join("patch_index.json"), &json)?;
    std::fs::write(run_dir.join("patch_index.digest"), digest.as_bytes())?;

    info!(run_id = %run_id, candidates = index.results.len(), "candidate artifacts written");
    Ok(index)
}

/// Read and verify `<dir>/<run_id>/patch_index.json` integrity.
pub fn read_patch_index(run_id: &str, dir: &Path) -> Result<PatchIndex> {
    let run_dir = run_dir(dir, run_id);
    let json = std::fs::read(run_dir.join("patch_index.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("patch_index.digest"))?;

    let actual = ContentDigest::from_bytes(&json).as_str().to_string();
    if digest.trim() != actual {
        return Err(HealgateError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// Read one candidate's diff back from the run directory.
pub fn read_candidate_patch(run_id: &str, dir: &Path, entry: &PatchIndexEntry) -> Result<String> {
    let path = run_dir(dir, run_id).join(&entry.patch_path);
    Ok(std::fs::read_to_string(path)?)
}
