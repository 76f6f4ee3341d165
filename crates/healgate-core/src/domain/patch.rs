//! Patch candidates proposed for a failing build.

use serde::{Deserialize, Serialize};

use crate::domain::review::RiskTier;

/// Failure category the patch claims to address.
///
/// Used only for scope plausibility checks; `Unknown` disables them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Test,
    Lint,
    Build,
    Deps,
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Lint => write!(f, "lint"),
            Self::Build => write!(f, "build"),
            Self::Deps => write!(f, "deps"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One proposed fix: an identifier, a declared risk posture, and a unified
/// diff. Immutable once constructed; every downstream judgement recomputes
/// what it needs from `diff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchStrategy {
    /// Stable identifier, unique within one evaluation batch.
    pub id: String,
    /// Human-facing name (`conservative`, `balanced`, `aggressive` for the
    /// canonical triple; arbitrary labels are accepted).
    pub label: String,
    /// Risk tier declared by the proposer. Advisory only.
    pub risk: RiskTier,
    /// One-line description of the intended change.
    pub summary: String,
    /// Unified diff text.
    pub diff: String,
}

impl PatchStrategy {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        risk: RiskTier,
        summary: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            risk,
            summary: summary.into(),
            diff: diff.into(),
        }
    }
}
