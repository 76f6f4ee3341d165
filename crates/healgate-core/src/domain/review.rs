//! Review verdicts and risk tiers for patch candidates.

use serde::{Deserialize, Serialize};

/// Risk tier assigned to a patch candidate.
///
/// Tiers are ordered so that merges can take the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Small, well-scoped change.
    Low,
    /// Broader change worth a closer look.
    Medium,
    /// Dangerous or out-of-policy change.
    High,
}

impl RiskTier {
    /// Rank used for candidate ordering (lower is safer).
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Final go / no-go decision for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Go,
    NoGo,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Go => write!(f, "GO"),
            Self::NoGo => write!(f, "NO_GO"),
        }
    }
}

/// Quality review for one patch candidate.
///
/// Produced by the deterministic scorer, by an external reviewer, or by
/// merging both. `slop_score` is always within `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReview {
    pub verdict: Verdict,
    pub risk_level: RiskTier,
    pub slop_score: f64,
    pub reasons: Vec<String>,
    pub suggested_adjustments: Vec<String>,
}

impl QualityReview {
    /// Review that forces the safest outcome, citing one reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::NoGo,
            risk_level: RiskTier::High,
            slop_score: 1.0,
            reasons: vec![reason.into()],
            suggested_adjustments: Vec::new(),
        }
    }

    pub fn is_go(&self) -> bool {
        self.verdict == Verdict::Go
    }
}
