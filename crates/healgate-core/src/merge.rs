//! External review ingestion and verdict merging.
//!
//! External reviewers are untrusted: their output may be wrapped in prose,
//! truncated, or adversarial. Everything that arrives here is normalized to
//! the safest interpretation before it can influence a verdict.

use serde::Deserialize;

use crate::domain::error::{HealgateError, Result};
use crate::domain::review::{QualityReview, RiskTier, Verdict};

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Extract the first balanced `{...}` object from free-form reviewer output.
///
/// Tracks string and escape state so braces inside JSON strings do not
/// unbalance the scan.
pub fn extract_json_object(text: &str) -> Result<&str> {
    let bytes = text.as_bytes();
    let start = text
        .find('{')
        .ok_or_else(|| HealgateError::MalformedReview("no JSON object found".to_string()))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' if in_string => escape = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    Err(HealgateError::MalformedReview(
        "unbalanced JSON object, missing closing brace".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Boundary normalization
// ---------------------------------------------------------------------------

/// Wire shape of an external review before validation. Every field is
/// optional; anything missing normalizes to the safest value.
#[derive(Debug, Deserialize)]
struct RawExternalReview {
    verdict: Option<String>,
    risk_level: Option<String>,
    slop_score: Option<f64>,
    reasons: Option<Vec<String>>,
    suggested_adjustments: Option<Vec<String>>,
}

/// Normalize external reviewer output into a trusted [`QualityReview`].
///
/// `None` and unparsable text both collapse to a forced maximum-risk NO_GO.
/// An out-of-range slop score marks the reviewer as broken or adversarial
/// and collapses the same way, with an explicit range-violation reason.
pub fn normalize_external_review(raw: Option<&str>) -> QualityReview {
    let Some(text) = raw else {
        return QualityReview::rejected("external review absent");
    };

    let object = match extract_json_object(text) {
        Ok(object) => object,
        Err(err) => {
            return QualityReview::rejected(format!("external review unparsable: {err}"));
        }
    };
    let parsed: RawExternalReview = match serde_json::from_str(object) {
        Ok(parsed) => parsed,
        Err(err) => {
            return QualityReview::rejected(format!("external review unparsable: {err}"));
        }
    };

    let mut reasons = parsed.reasons.unwrap_or_default();
    let suggested_adjustments = parsed.suggested_adjustments.unwrap_or_default();

    let verdict = match parsed.verdict.as_deref() {
        Some("GO") => Verdict::Go,
        Some("NO_GO") => Verdict::NoGo,
        other => {
            reasons.push(format!(
                "external verdict {} unrecognized, treated as NO_GO",
                other.map_or_else(|| "(missing)".to_string(), |v| format!("'{v}'")),
            ));
            Verdict::NoGo
        }
    };

    let risk_level = match parsed.risk_level.as_deref() {
        Some("low") => RiskTier::Low,
        Some("medium") => RiskTier::Medium,
        _ => RiskTier::High,
    };

    let slop_score = match parsed.slop_score {
        Some(score) if score.is_finite() && (0.0..=1.0).contains(&score) => score,
        Some(score) => {
            return QualityReview::rejected(format!(
                "external review slop score range violation: {score}"
            ));
        }
        None => {
            reasons.push("external review missing slop score".to_string());
            1.0
        }
    };

    QualityReview {
        verdict,
        risk_level,
        slop_score,
        reasons,
        suggested_adjustments,
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Monotonic merge of two reviews: NO_GO wins, tiers and scores take the
/// maximum, reasons and adjustments take the deduplicated union. Merging can
/// only make a verdict stricter.
pub fn merge_reviews(a: &QualityReview, b: &QualityReview) -> QualityReview {
    let verdict = if a.verdict == Verdict::NoGo || b.verdict == Verdict::NoGo {
        Verdict::NoGo
    } else {
        Verdict::Go
    };

    let mut reasons = a.reasons.clone();
    for reason in &b.reasons {
        if !reasons.contains(reason) {
            reasons.push(reason.clone());
        }
    }
    let mut suggested_adjustments = a.suggested_adjustments.clone();
    for adj in &b.suggested_adjustments {
        if !suggested_adjustments.contains(adj) {
            suggested_adjustments.push(adj.clone());
        }
    }

    QualityReview {
        verdict,
        risk_level: a.risk_level.max(b.risk_level),
        slop_score: a.slop_score.max(b.slop_score),
        reasons,
        suggested_adjustments,
    }
}

/// Full merger for one candidate: normalize the external review, then merge
/// it with the deterministic one.
pub fn merged_review(deterministic: &QualityReview, external: Option<&str>) -> QualityReview {
    let external = normalize_external_review(external);
    merge_reviews(deterministic, &external)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_review(score: f64) -> QualityReview {
        QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Low,
            slop_score: score,
            reasons: Vec::new(),
            suggested_adjustments: Vec::new(),
        }
    }

    #[test]
    fn test_extract_object_from_prose() {
        let text = "Here is my review:\n{\"verdict\": \"GO\"}\nHope it helps!";
        assert_eq!(extract_json_object(text).unwrap(), r#"{"verdict": "GO"}"#);
    }

    #[test]
    fn test_extract_tracks_braces_inside_strings() {
        let text = r#"prefix {"reason": "use } sparingly", "n": {"x": 1}} suffix"#;
        assert_eq!(
            extract_json_object(text).unwrap(),
            r#"{"reason": "use } sparingly", "n": {"x": 1}}"#
        );
    }

    #[test]
    fn test_extract_handles_escaped_quotes() {
        let text = r#"{"reason": "she said \"}\" loudly"}"#;
        assert_eq!(extract_json_object(text).unwrap(), text);
    }

    #[test]
    fn test_extract_errors() {
        assert!(matches!(
            extract_json_object("no braces here"),
            Err(HealgateError::MalformedReview(_))
        ));
        assert!(matches!(
            extract_json_object("{\"truncated\": "),
            Err(HealgateError::MalformedReview(_))
        ));
    }

    #[test]
    fn test_absent_review_is_forced_no_go() {
        let review = normalize_external_review(None);
        assert_eq!(review.verdict, Verdict::NoGo);
        assert_eq!(review.risk_level, RiskTier::High);
        assert_eq!(review.slop_score, 1.0);
    }

    #[test]
    fn test_unparsable_review_is_forced_no_go() {
        let review = normalize_external_review(Some("total garbage"));
        assert_eq!(review.verdict, Verdict::NoGo);
        assert!(review.reasons[0].contains("unparsable"));
    }

    #[test]
    fn test_well_formed_go_review_passes_through() {
        let text = r#"{"verdict": "GO", "risk_level": "low", "slop_score": 0.1,
                      "reasons": ["minimal change"], "suggested_adjustments": []}"#;
        let review = normalize_external_review(Some(text));
        assert_eq!(review.verdict, Verdict::Go);
        assert_eq!(review.risk_level, RiskTier::Low);
        assert_eq!(review.slop_score, 0.1);
    }

    #[test]
    fn test_out_of_range_score_is_range_violation() {
        let text = r#"{"verdict": "GO", "risk_level": "low", "slop_score": 2.5}"#;
        let review = normalize_external_review(Some(text));
        assert_eq!(review.verdict, Verdict::NoGo);
        assert_eq!(review.risk_level, RiskTier::High);
        assert_eq!(review.slop_score, 1.0);
        assert!(review.reasons[0].contains("range violation"));

        let negative = r#"{"verdict": "GO", "slop_score": -0.2}"#;
        assert_eq!(
            normalize_external_review(Some(negative)).verdict,
            Verdict::NoGo
        );
    }

    #[test]
    fn test_missing_fields_normalize_to_safest() {
        let review = normalize_external_review(Some("{}"));
        assert_eq!(review.verdict, Verdict::NoGo);
        assert_eq!(review.risk_level, RiskTier::High);
        assert_eq!(review.slop_score, 1.0);
    }

    #[test]
    fn test_merge_no_go_wins_both_directions() {
        let go = go_review(0.1);
        let no_go = QualityReview::rejected("policy violation");
        assert_eq!(merge_reviews(&go, &no_go).verdict, Verdict::NoGo);
        assert_eq!(merge_reviews(&no_go, &go).verdict, Verdict::NoGo);
    }

    #[test]
    fn test_merge_takes_maximums() {
        let a = QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Medium,
            slop_score: 0.4,
            reasons: vec!["r1".to_string()],
            suggested_adjustments: Vec::new(),
        };
        let b = QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Low,
            slop_score: 0.6,
            reasons: vec!["r2".to_string()],
            suggested_adjustments: Vec::new(),
        };
        let merged = merge_reviews(&a, &b);
        assert_eq!(merged.verdict, Verdict::Go);
        assert_eq!(merged.risk_level, RiskTier::Medium);
        assert_eq!(merged.slop_score, 0.6);
        assert_eq!(merged.reasons, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let review = QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Medium,
            slop_score: 0.4,
            reasons: vec!["r1".to_string()],
            suggested_adjustments: vec!["a1".to_string()],
        };
        assert_eq!(merge_reviews(&review, &review), review);
    }

    #[test]
    fn test_merge_is_commutative_on_scalars() {
        let a = go_review(0.3);
        let b = QualityReview {
            verdict: Verdict::Go,
            risk_level: RiskTier::Medium,
            slop_score: 0.2,
            reasons: vec!["broad change".to_string()],
            suggested_adjustments: Vec::new(),
        };
        let ab = merge_reviews(&a, &b);
        let ba = merge_reviews(&b, &a);
        assert_eq!(ab.verdict, ba.verdict);
        assert_eq!(ab.risk_level, ba.risk_level);
        assert_eq!(ab.slop_score, ba.slop_score);
        let mut ab_reasons = ab.reasons.clone();
        let mut ba_reasons = ba.reasons.clone();
        ab_reasons.sort();
        ba_reasons.sort();
        assert_eq!(ab_reasons, ba_reasons);
    }

    #[test]
    fn test_merged_review_with_range_violation_overrides_go() {
        let local = go_review(0.1);
        let text = r#"{"verdict": "GO", "risk_level": "low", "slop_score": 7}"#;
        let merged = merged_review(&local, Some(text));
        assert_eq!(merged.verdict, Verdict::NoGo);
        assert_eq!(merged.risk_level, RiskTier::High);
        assert_eq!(merged.slop_score, 1.0);
        assert!(merged.reasons.iter().any(|r| r.contains("range violation")));
    }
}
