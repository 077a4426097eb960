//! Trust scoring for claimed facts.
//!
//! A fact's score combines per-source evidence (reliability, freshness,
//! verification, agreement) with a bonus for cross-model consensus, then
//! calibrates the sum onto a 0-100 scale.

use crate::models::{round2, Fact, SourceEvidence, TrustComponents, TrustResult, TrustTier};
use tracing::warn;

/// Calibration divisor `Z`.
pub const CALIBRATION: f64 = 1.5;

/// Consensus weight `λ`: agreement can lift a score by up to 15%.
pub const CONSENSUS_WEIGHT: f64 = 0.15;

/// Half-life used when a field name matches no category.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 90.0;

const MIN_HALF_LIFE_DAYS: f64 = 0.001;

/// Field categories in match order, with their half-lives in days.
const HALF_LIFE_CATEGORIES: &[(&[&str], f64)] = &[
    (&["price", "stock", "quote"], 0.02),
    (&["marketcap", "mktcap", "volume", "ratio"], 2.0),
    (&["fund", "round", "raise", "series"], 365.0),
    (
        &[
            "found",
            "location",
            "headquarter",
            "hq",
            "industry",
            "sector",
            "city",
            "country",
        ],
        730.0,
    ),
    (&["news", "sentiment", "press", "headline"], 14.0),
];

/// Decay half-life for a field, in days.
pub fn half_life_days(field: &str) -> f64 {
    let lowered = field.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let compact = tokens.concat();

    for (stems, half_life) in HALF_LIFE_CATEGORIES {
        let hit = stems.iter().any(|stem| {
            tokens.iter().any(|t| t.starts_with(stem)) || (stem.len() > 5 && compact.contains(stem))
        });
        if hit {
            return *half_life;
        }
    }

    DEFAULT_HALF_LIFE_DAYS
}

/// Exponential half-life decay multiplier for evidence of a given age.
pub fn freshness_multiplier(age_days: f64, half_life_days: f64) -> f64 {
    let age = sanitize(age_days, 0.0, f64::MAX);
    let half_life = half_life_days.max(MIN_HALF_LIFE_DAYS);
    (-std::f64::consts::LN_2 * age / half_life).exp()
}

/// Contribution `Es` of a single source.
fn evidence_contribution(source: &SourceEvidence, half_life: f64) -> f64 {
    sanitize(source.reliability, 0.0, 1.0)
        * freshness_multiplier(source.freshness_days, half_life)
        * sanitize(source.verification, 0.0, 1.0)
        * sanitize(source.agreement, 0.0, 1.0)
}

fn sanitize(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

/// Score one fact. Never fails: malformed facts score zero.
pub fn score(fact: &Fact) -> TrustResult {
    if let Err(e) = fact.validate() {
        warn!("Failing closed on malformed fact: {}", e);
        return zero_result(DEFAULT_HALF_LIFE_DAYS);
    }

    let half_life = half_life_days(&fact.field);
    let evidence: f64 = fact
        .sources
        .iter()
        .map(|s| evidence_contribution(s, half_life))
        .sum();

    let consensus = sanitize(fact.ai_consensus.unwrap_or(0.0), 0.0, 1.0);
    let consensus_bonus = 1.0 + CONSENSUS_WEIGHT * consensus;
    let raw = (100.0 * (evidence / CALIBRATION) * consensus_bonus).min(100.0);
    let score = round2(raw);

    TrustResult {
        score,
        tier: TrustTier::from_score(score),
        components: TrustComponents {
            evidence,
            calibration: CALIBRATION,
            consensus_bonus,
            consensus,
            consensus_weight: CONSENSUS_WEIGHT,
            half_life_days: half_life,
        },
    }
}

fn zero_result(half_life: f64) -> TrustResult {
    TrustResult {
        score: 0.0,
        tier: TrustTier::Low,
        components: TrustComponents {
            evidence: 0.0,
            calibration: CALIBRATION,
            consensus_bonus: 1.0,
            consensus: 0.0,
            consensus_weight: CONSENSUS_WEIGHT,
            half_life_days: half_life,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn source(reliability: f64, freshness_days: f64, verification: f64, agreement: f64) -> SourceEvidence {
        SourceEvidence {
            source: "openai".to_string(),
            reliability,
            freshness_days,
            verification,
            agreement,
        }
    }

    fn fact(field: &str, sources: Vec<SourceEvidence>, ai_consensus: Option<f64>) -> Fact {
        Fact {
            field: field.to_string(),
            value: Value::from("x"),
            sources,
            ai_consensus,
        }
    }

    #[test]
    fn test_zero_sources_scores_zero() {
        for field in ["industry", "stock_price", "anything"] {
            let result = score(&fact(field, vec![], Some(1.0)));
            assert_eq!(result.score, 0.0);
            assert_eq!(result.tier, TrustTier::Low);
        }
    }

    #[test]
    fn test_perfect_single_source() {
        // min(100, 100 / Z * (1 + λ)) = 76.67
        let result = score(&fact("industry", vec![source(1.0, 0.0, 1.0, 1.0)], Some(1.0)));
        let expected = round2((100.0 / CALIBRATION * (1.0 + CONSENSUS_WEIGHT)).min(100.0));
        assert_eq!(result.score, expected);
        assert_eq!(result.score, 76.67);
        assert_eq!(result.tier, TrustTier::Medium);
        assert!((result.components.consensus_bonus - 1.15).abs() < 1e-12);
    }

    #[test]
    fn test_score_is_capped_at_100() {
        let perfect = source(1.0, 0.0, 1.0, 1.0);
        let result = score(&fact("industry", vec![perfect.clone(), perfect], Some(1.0)));
        assert_eq!(result.score, 100.0);
        assert_eq!(result.tier, TrustTier::High);
    }

    #[test]
    fn test_single_source_without_consensus() {
        // 100 * (0.9 / 1.5) = 60
        let result = score(&fact("industry", vec![source(0.9, 0.0, 1.0, 1.0)], None));
        assert_eq!(result.score, 60.0);
        assert_eq!(result.tier, TrustTier::Low);
    }

    #[test]
    fn test_evidence_at_half_life_counts_half() {
        let fresh = score(&fact("employee_count", vec![source(1.0, 0.0, 1.0, 0.5)], None));
        let aged = score(&fact("employee_count", vec![source(1.0, 90.0, 1.0, 0.5)], None));
        assert!((aged.components.evidence * 2.0 - fresh.components.evidence).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_is_monotonic() {
        let mut previous = f64::MAX;
        for days in [0.0, 0.5, 1.0, 7.0, 30.0, 90.0, 365.0, 3650.0] {
            let result = score(&fact("revenue", vec![source(0.8, days, 1.0, 1.0)], Some(0.5)));
            assert!(result.score <= previous, "score rose at {} days", days);
            previous = result.score;
        }
    }

    #[test]
    fn test_negative_age_does_not_inflate() {
        let fresh = score(&fact("revenue", vec![source(0.8, 0.0, 1.0, 1.0)], None));
        let future = score(&fact("revenue", vec![source(0.8, -30.0, 1.0, 1.0)], None));
        assert_eq!(fresh.score, future.score);
    }

    #[test]
    fn test_price_decays_within_a_day() {
        let result = score(&fact("stock_price", vec![source(1.0, 1.0, 1.0, 1.0)], None));
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_half_life_categories() {
        assert_eq!(half_life_days("stock_price"), 0.02);
        assert_eq!(half_life_days("stockPrice"), 0.02);
        assert_eq!(half_life_days("market_cap"), 2.0);
        assert_eq!(half_life_days("marketCap"), 2.0);
        assert_eq!(half_life_days("trading_volume"), 2.0);
        assert_eq!(half_life_days("pe_ratio"), 2.0);
        assert_eq!(half_life_days("funding_round"), 365.0);
        assert_eq!(half_life_days("total_raised"), 365.0);
        assert_eq!(half_life_days("founded_year"), 730.0);
        assert_eq!(half_life_days("headquarters_location"), 730.0);
        assert_eq!(half_life_days("Industry"), 730.0);
        assert_eq!(half_life_days("news_sentiment"), 14.0);
        assert_eq!(half_life_days("employee_count"), DEFAULT_HALF_LIFE_DAYS);
        assert_eq!(half_life_days("background"), DEFAULT_HALF_LIFE_DAYS);
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        let result = score(&fact(
            "industry",
            vec![source(4.0, f64::NAN, 2.0, 1.0)],
            Some(7.0),
        ));
        assert_eq!(result.components.consensus, 1.0);
        assert_eq!(result.score, 76.67);
    }

    #[test]
    fn test_malformed_fact_fails_closed() {
        let result = score(&fact("", vec![source(1.0, 0.0, 1.0, 1.0)], Some(1.0)));
        assert_eq!(result.score, 0.0);
        assert_eq!(result.tier, TrustTier::Low);
    }

    #[test]
    fn test_multiple_sources_accumulate() {
        let one = score(&fact("revenue", vec![source(0.5, 0.0, 1.0, 1.0)], None));
        let two = score(&fact(
            "revenue",
            vec![source(0.5, 0.0, 1.0, 1.0), source(0.5, 0.0, 1.0, 1.0)],
            None,
        ));
        assert!((two.score - one.score * 2.0).abs() < 0.02);
    }
}
