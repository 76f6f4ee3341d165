//! Deterministic patch scoring rules engine.
//!
//! Evaluates a candidate diff against a [`ScoreRuleSet`] to produce a
//! [`QualityReview`]. Rules accumulate an additive risk score with fixed
//! weights; some force NO_GO outright. The scorer is a pure function of its
//! inputs and never calls out to any external service.

use serde::{Deserialize, Serialize};

use crate::diff::{self, ChangeKind, FileChange};
use crate::domain::patch::FailureKind;
use crate::domain::review::{QualityReview, RiskTier, Verdict};
use crate::pathspec::{glob_match, AllowList};

/// Score at or above which the verdict becomes NO_GO.
pub const NO_GO_SCORE: f64 = 0.65;
/// Score at or above which the tier becomes high.
pub const HIGH_TIER_SCORE: f64 = 0.7;
/// Score at or above which the tier becomes medium.
pub const MEDIUM_TIER_SCORE: f64 = 0.35;

// ---------------------------------------------------------------------------
// Scoring rules
// ---------------------------------------------------------------------------

/// A single scoring rule that raises risk and may force NO_GO outright.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreRule {
    /// Any affected file outside the allow-list.
    OutOfScope,
    /// Any affected file under a CI workflow definition path.
    WorkflowEdit,
    /// Any file deleted outright.
    FileDeletion,
    /// Affected-file count above the policy cap.
    FileCountCap,
    /// Added lines that neutralize checks instead of fixing them.
    BypassSignal,
    /// Added lines carrying static-analysis suppression directives.
    SuppressionDirective,
    /// Added lines carrying TODO/FIXME/HACK markers.
    DebtMarker,
    /// Added-line count above the policy threshold.
    OversizedDiff,
    /// Affected files implausible for the declared failure category.
    ScopeMismatch,
    /// Diff text that does not parse as a unified diff.
    MalformedDiff,
}

impl ScoreRule {
    /// Fixed risk weight contributed when the rule fires.
    pub fn weight(&self) -> f64 {
        match self {
            Self::OutOfScope => 0.8,
            Self::WorkflowEdit => 0.7,
            Self::FileDeletion => 0.6,
            Self::FileCountCap => 0.5,
            Self::BypassSignal => 0.9,
            Self::SuppressionDirective => 0.6,
            Self::DebtMarker => 0.15,
            Self::OversizedDiff => 0.25,
            Self::ScopeMismatch => 0.2,
            Self::MalformedDiff => 1.0,
        }
    }

    /// Whether firing forces NO_GO regardless of total score.
    pub fn forces_no_go(&self) -> bool {
        !matches!(
            self,
            Self::DebtMarker | Self::OversizedDiff | Self::ScopeMismatch
        )
    }
}

/// Policy constants referenced by the rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorePolicy {
    /// Hard cap on affected files per patch.
    pub max_files: usize,
    /// Added-line count above which a patch is oversized.
    pub max_added_lines: usize,
    /// Globs naming CI workflow definitions.
    pub workflow_globs: Vec<String>,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_added_lines: 200,
            workflow_globs: vec![".github/workflows/**".to_string()],
        }
    }
}

/// A set of scoring rules plus the policy constants they reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRuleSet {
    pub policy: ScorePolicy,
    pub rules: Vec<ScoreRule>,
}

impl ScoreRuleSet {
    /// Rule set with default policy and every standard rule enabled.
    pub fn standard() -> Self {
        Self {
            policy: ScorePolicy::default(),
            rules: vec![
                ScoreRule::OutOfScope,
                ScoreRule::WorkflowEdit,
                ScoreRule::FileDeletion,
                ScoreRule::FileCountCap,
                ScoreRule::BypassSignal,
                ScoreRule::SuppressionDirective,
                ScoreRule::DebtMarker,
                ScoreRule::OversizedDiff,
                ScoreRule::ScopeMismatch,
            ],
        }
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: ScoreRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Override the policy constants.
    pub fn with_policy(mut self, policy: ScorePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// The candidate under review: declared intent plus effective scope and diff.
#[derive(Debug, Clone)]
pub struct ScoreSubject<'a> {
    pub intent: FailureKind,
    pub allow_list: &'a AllowList,
    pub diff: &'a str,
}

/// A single rule violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreViolation {
    /// Which rule fired.
    pub rule: ScoreRule,
    /// Human-readable explanation.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Pattern catalogs
// ---------------------------------------------------------------------------

/// Added-line patterns that neutralize checks rather than fix them: forced
/// success exit codes, disabled lint or verification, suppressed non-zero
/// exit propagation, and disabled TLS/certificate verification.
const BYPASS_PATTERNS: &[&str] = &[
    r"(?i)\bexit\s+0\b",
    r"(?i)lint:\s*skipped",
    r"(?i)continue-on-error:\s*true",
    r"(?i)--no-verify\b",
    r"(?i)process\.exit\(0\)",
    r"(?i)\|\|\s*true\b",
    r"(?i)set\s+\+e\b",
    r"(?i)node_tls_reject_unauthorized\s*=\s*0",
    r"(?i)git_ssl_no_verify\s*=\s*(?:1|true)",
    r"(?i)strict-ssl\s*(?:=|\s)\s*false",
    r"(?i)npm\s+config\s+set\s+strict-ssl\s+false",
    r"(?i)--insecure\b",
    r"(?i)\bcurl\b[^\r\n]*\s-k\b",
];

/// Static-analysis suppression directives.
const SUPPRESSION_PATTERNS: &[&str] = &[
    r"(?i)eslint-disable",
    r"(?i)@ts-ignore",
    r"(?i)@ts-nocheck",
    r"(?i)\bnoqa\b",
    r"(?i)pylint:\s*disable",
    r"#\[allow\(",
];

const DEBT_MARKER_PATTERN: &str = r"\b(TODO|FIXME|HACK)\b";

/// Manifest and lockfile names considered plausible for dependency fixes.
const DEPENDENCY_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.toml",
    "Cargo.lock",
    "go.mod",
    "go.sum",
    "requirements.txt",
    "pyproject.toml",
    "Gemfile",
    "Gemfile.lock",
    "pom.xml",
];

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct ScoreContext<'a> {
    intent: FailureKind,
    allow_list: &'a AllowList,
    changes: Vec<FileChange>,
    added: Vec<&'a str>,
}

/// Evaluate a [`ScoreSubject`] against a [`ScoreRuleSet`].
///
/// Unparsable diff text short-circuits into a forced NO_GO rather than an
/// error; a patch that cannot be read cannot be trusted.
pub fn evaluate_patch(rule_set: &ScoreRuleSet, subject: &ScoreSubject) -> QualityReview {
    let files = match diff::parse_patch(subject.diff) {
        Ok(files) => files,
        Err(err) => {
            return compose_review(vec![ScoreViolation {
                rule: ScoreRule::MalformedDiff,
                reason: err.to_string(),
            }]);
        }
    };

    let ctx = ScoreContext {
        intent: subject.intent,
        allow_list: subject.allow_list,
        changes: diff::file_changes(&files),
        added: diff::added_lines(&files),
    };

    let mut violations = Vec::new();
    for rule in &rule_set.rules {
        if let Some(v) = check_rule(rule, &rule_set.policy, &ctx) {
            violations.push(v);
        }
    }

    compose_review(violations)
}

fn check_rule(
    rule: &ScoreRule,
    policy: &ScorePolicy,
    ctx: &ScoreContext<'_>,
) -> Option<ScoreViolation> {
    match rule {
        ScoreRule::OutOfScope => {
            let outside: Vec<&str> = ctx
                .changes
                .iter()
                .filter(|c| !ctx.allow_list.permits(&c.path))
                .map(|c| c.path.as_str())
                .collect();
            if outside.is_empty() {
                None
            } else {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!(
                        "{} file(s) outside allow-list: [{}]",
                        outside.len(),
                        outside.join(", "),
                    ),
                })
            }
        }
        ScoreRule::WorkflowEdit => {
            let touched: Vec<&str> = ctx
                .changes
                .iter()
                .filter(|c| {
                    policy
                        .workflow_globs
                        .iter()
                        .any(|g| glob_match(g, &c.path))
                })
                .map(|c| c.path.as_str())
                .collect();
            if touched.is_empty() {
                None
            } else {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!("workflow definition edited: [{}]", touched.join(", ")),
                })
            }
        }
        ScoreRule::FileDeletion => {
            let deleted: Vec<&str> = ctx
                .changes
                .iter()
                .filter(|c| c.kind == ChangeKind::Deleted)
                .map(|c| c.path.as_str())
                .collect();
            if deleted.is_empty() {
                None
            } else {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!("file deletion present: [{}]", deleted.join(", ")),
                })
            }
        }
        ScoreRule::FileCountCap => {
            if ctx.changes.len() > policy.max_files {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!(
                        "{} files affected, cap is {}",
                        ctx.changes.len(),
                        policy.max_files,
                    ),
                })
            } else {
                None
            }
        }
        ScoreRule::BypassSignal => first_pattern_hit(&ctx.added, BYPASS_PATTERNS).map(|hit| {
            ScoreViolation {
                rule: rule.clone(),
                reason: format!("bypass signal in added lines: `{hit}`"),
            }
        }),
        ScoreRule::SuppressionDirective => first_pattern_hit(&ctx.added, SUPPRESSION_PATTERNS)
            .map(|hit| ScoreViolation {
                rule: rule.clone(),
                reason: format!("suppression directive in added lines: `{hit}`"),
            }),
        ScoreRule::DebtMarker => {
            let count = match regex::Regex::new(DEBT_MARKER_PATTERN) {
                Ok(re) => ctx
                    .added
                    .iter()
                    .filter(|line| re.is_match(line))
                    .count(),
                Err(_) => 0,
            };
            if count > 0 {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!("{count} added line(s) carry TODO/FIXME/HACK markers"),
                })
            } else {
                None
            }
        }
        ScoreRule::OversizedDiff => {
            if ctx.added.len() > policy.max_added_lines {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!(
                        "{} added lines, threshold is {}",
                        ctx.added.len(),
                        policy.max_added_lines,
                    ),
                })
            } else {
                None
            }
        }
        ScoreRule::ScopeMismatch => {
            if intent_plausible(ctx.intent, &ctx.changes) {
                None
            } else {
                Some(ScoreViolation {
                    rule: rule.clone(),
                    reason: format!(
                        "declared {} fix touches no {}-related files",
                        ctx.intent, ctx.intent,
                    ),
                })
            }
        }
        // Raised by evaluate_patch before rules run.
        ScoreRule::MalformedDiff => None,
    }
}

/// First matched snippet across added lines, checked pattern by pattern.
fn first_pattern_hit<'a>(added: &[&'a str], patterns: &[&str]) -> Option<&'a str> {
    for pattern in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            for line in added {
                if let Some(m) = re.find(line) {
                    return Some(&line[m.range()]);
                }
            }
        }
    }
    None
}

fn intent_plausible(intent: FailureKind, changes: &[FileChange]) -> bool {
    match intent {
        FailureKind::Test => changes.iter().any(|c| {
            let path = c.path.to_lowercase();
            path.contains("test") || path.contains("spec")
        }),
        FailureKind::Deps => changes.iter().any(|c| {
            let name = c.path.rsplit('/').next().unwrap_or(&c.path);
            DEPENDENCY_FILES.contains(&name) || name.ends_with(".lock")
        }),
        FailureKind::Lint | FailureKind::Build | FailureKind::Unknown => true,
    }
}

fn compose_review(violations: Vec<ScoreViolation>) -> QualityReview {
    let forced = violations.iter().any(|v| v.rule.forces_no_go());
    let score: f64 = violations.iter().map(|v| v.rule.weight()).sum();
    let score = score.clamp(0.0, 1.0);

    let risk_level = if forced || score >= HIGH_TIER_SCORE {
        RiskTier::High
    } else if score >= MEDIUM_TIER_SCORE {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };
    let verdict = if forced || score >= NO_GO_SCORE {
        Verdict::NoGo
    } else {
        Verdict::Go
    };

    let suggested_adjustments = violations
        .iter()
        .filter_map(|v| suggest_adjustment(&v.rule))
        .map(str::to_string)
        .collect();
    let reasons = violations.into_iter().map(|v| v.reason).collect();

    QualityReview {
        verdict,
        risk_level,
        slop_score: score,
        reasons,
        suggested_adjustments,
    }
}

fn suggest_adjustment(rule: &ScoreRule) -> Option<&'static str> {
    match rule {
        ScoreRule::OutOfScope => Some("limit changes to allow-listed files"),
        ScoreRule::WorkflowEdit => {
            Some("leave workflow definitions untouched and fix the underlying failure")
        }
        ScoreRule::BypassSignal => Some("address the failing check instead of disabling it"),
        ScoreRule::SuppressionDirective => {
            Some("fix the reported findings instead of suppressing them")
        }
        ScoreRule::FileCountCap | ScoreRule::OversizedDiff => {
            Some("split the change into smaller, focused patches")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(patterns: &[&str]) -> AllowList {
        AllowList::new(patterns.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn modify_diff(path: &str, added: &[&str]) -> String {
        let mut out = format!("--- a/{path}\n+++ b/{path}\n@@ -1,1 +1,{} @@\n context\n", added.len() + 1);
        for line in added {
            out.push_str(&format!("+{line}\n"));
        }
        out
    }

    #[test]
    fn test_clean_in_scope_patch_is_go() {
        let allow = allow(&["src/**/*.ts"]);
        let diff = modify_diff("src/app.ts", &["const x = 1;"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::Go);
        assert_eq!(review.risk_level, RiskTier::Low);
        assert!(review.reasons.is_empty());
    }

    #[test]
    fn test_out_of_scope_forces_no_go_high() {
        let allow = allow(&["src/**/*.ts"]);
        let diff = modify_diff("lib/other.ts", &["const x = 1;"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
        assert_eq!(review.risk_level, RiskTier::High);
        assert!(review.reasons.iter().any(|r| r.contains("allow-list")));
    }

    #[test]
    fn test_bypass_signal_in_allow_listed_test_file() {
        let allow = allow(&["tests/**"]);
        let diff = modify_diff("tests/unit.test.ts", &["process.exit(0)"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Test,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
        assert!(review.reasons.iter().any(|r| r.contains("bypass signal")));
    }

    #[test]
    fn test_workflow_edit_forces_no_go() {
        let allow = allow(&["**"]);
        let diff = modify_diff(".github/workflows/ci.yml", &["      - run: echo ok"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
        assert!(review
            .reasons
            .iter()
            .any(|r| r.contains("workflow definition")));
    }

    #[test]
    fn test_file_deletion_forces_no_go() {
        let allow = allow(&["**"]);
        let diff = "\
diff --git a/old.txt b/old.txt
deleted file mode 100644
--- a/old.txt
+++ /dev/null
@@ -1,1 +0,0 @@
-goodbye
";
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
    }

    #[test]
    fn test_debt_markers_raise_risk_without_forcing() {
        let allow = allow(&["src/**"]);
        let diff = modify_diff("src/app.ts", &["// TODO fix this properly"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::Go);
        assert!(review.slop_score > 0.0);
        assert!(review.reasons.iter().any(|r| r.contains("TODO")));
    }

    #[test]
    fn test_risk_only_rules_accumulate_without_forcing() {
        let allow = allow(&["src/**"]);
        // Oversized + debt markers + scope mismatch: 0.25 + 0.15 + 0.2 = 0.6,
        // still GO; tier lands at medium.
        let added: Vec<String> = (0..201)
            .map(|i| {
                if i == 0 {
                    "// TODO later".to_string()
                } else {
                    format!("const x{i} = {i};")
                }
            })
            .collect();
        let added_refs: Vec<&str> = added.iter().map(|s| s.as_str()).collect();
        let diff = modify_diff("src/app.ts", &added_refs);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Test,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::Go);
        assert_eq!(review.risk_level, RiskTier::Medium);
        assert!((review.slop_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_file_count_cap() {
        let allow = allow(&["**"]);
        let mut diff = String::new();
        for i in 0..6 {
            diff.push_str(&modify_diff(&format!("src/f{i}.ts"), &["const a = 1;"]));
        }
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
        assert!(review.reasons.iter().any(|r| r.contains("cap is 5")));
    }

    #[test]
    fn test_malformed_diff_is_forced_no_go() {
        let allow = allow(&["**"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Build,
                allow_list: &allow,
                diff: "this is not a diff",
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
        assert_eq!(review.risk_level, RiskTier::High);
        assert_eq!(review.slop_score, 1.0);
    }

    #[test]
    fn test_scorer_is_deterministic() {
        let allow = allow(&["src/**"]);
        let diff = modify_diff("src/app.ts", &["// HACK", "x || true"]);
        let subject = ScoreSubject {
            intent: FailureKind::Lint,
            allow_list: &allow,
            diff: &diff,
        };
        let first = evaluate_patch(&ScoreRuleSet::standard(), &subject);
        let second = evaluate_patch(&ScoreRuleSet::standard(), &subject);
        assert_eq!(first, second);
    }

    #[test]
    fn test_suppression_directive_forces_no_go() {
        let allow = allow(&["src/**"]);
        let diff = modify_diff("src/app.ts", &["// eslint-disable-next-line"]);
        let review = evaluate_patch(
            &ScoreRuleSet::standard(),
            &ScoreSubject {
                intent: FailureKind::Lint,
                allow_list: &allow,
                diff: &diff,
            },
        );
        assert_eq!(review.verdict, Verdict::NoGo);
    }
}
