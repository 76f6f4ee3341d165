//! Structured observability hooks for heal run lifecycle events.
//!
//! Provides a run-scoped tracing span via the `RunSpan` RAII guard plus
//! emission functions for the key lifecycle events: heal start, review
//! completion, gate evaluation, patch application, and heal finish.

use tracing::info;

/// RAII guard that enters a run-scoped tracing span for the duration of
/// a heal run.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("healgate.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: heal run started against a repository.
pub fn emit_heal_started(run_id: &str, repo: &str) {
    info!(event = "heal.started", run_id = %run_id, repo = %repo);
}

/// Emit event: candidate review batch finished.
pub fn emit_review_completed(run_id: &str, total: usize, go: usize) {
    info!(event = "review.completed", run_id = %run_id, total = total, go = go);
}

/// Emit event: one candidate passed through the gate.
pub fn emit_gate_evaluated(run_id: &str, patch_id: &str, slop_score: f64, go: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        patch_id = %patch_id,
        slop_score = slop_score,
        go = go,
    );
}

/// Emit event: vetted patch applied to the working tree.
pub fn emit_patch_applied(run_id: &str, files: usize) {
    info!(event = "patch.applied", run_id = %run_id, files = files);
}

/// Emit event: heal run finished with outcome and attempts used.
pub fn emit_heal_finished(run_id: &str, outcome: &str, attempts: u32, healed: bool) {
    info!(
        event = "heal.finished",
        run_id = %run_id,
        outcome = %outcome,
        attempts = attempts,
        healed = healed,
    );
}

/// Emit event: artifact persistence error (warning level).
pub fn emit_artifact_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "artifact.error", run_id = %run_id, error = %error);
}
