//! Turning provider claims into evidence-backed facts.
//!
//! Every field claimed by at least one provider becomes a [`Fact`] whose
//! value is the majority answer and whose sources carry each claimant's
//! reliability, age, citation backing and agreement with its peers.

use crate::generator::GeneratorOutput;
use crate::models::{Fact, RawAnalysisPayload, SourceEvidence};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Claim key carrying a provider's own quality estimate for the payload.
pub const QUALITY_CLAIM: &str = "data_quality_score";

const CITED_VERIFICATION: f64 = 1.0;
const UNCITED_VERIFICATION: f64 = 0.5;

/// A successful provider answer together with the provider's reliability.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub output: GeneratorOutput,
    pub reliability: f64,
}

/// Comparison key for claimed values: trimmed, case-folded strings and
/// numbers by value.
fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        other => other.to_string().to_lowercase(),
    }
}

fn age_days(as_of: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    as_of
        .map(|t| (now - t).num_seconds() as f64 / 86_400.0)
        .unwrap_or(0.0)
        .max(0.0)
}

struct Claim<'a> {
    response: &'a ProviderResponse,
    value: &'a Value,
    key: String,
}

/// Build one fact per claimed field across the given responses.
pub fn build_facts(responses: &[ProviderResponse], now: DateTime<Utc>) -> Vec<Fact> {
    let fields: BTreeSet<&String> = responses
        .iter()
        .flat_map(|r| r.output.claims.keys())
        .filter(|k| k.as_str() != QUALITY_CLAIM)
        .collect();

    fields
        .into_iter()
        .filter_map(|field| build_fact(field, responses, now))
        .collect()
}

fn build_fact(field: &str, responses: &[ProviderResponse], now: DateTime<Utc>) -> Option<Fact> {
    let claims: Vec<Claim> = responses
        .iter()
        .filter_map(|r| {
            r.output.claims.get(field).map(|value| Claim {
                response: r,
                value,
                key: normalize(value),
            })
        })
        .collect();

    if claims.is_empty() {
        return None;
    }

    let mut groups: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for claim in &claims {
        let entry = groups.entry(claim.key.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.max(claim.response.reliability);
    }

    // Majority wins; ties go to the more reliable provider, then provider order
    let mut winner: Option<(&Claim, usize, f64)> = None;
    for claim in &claims {
        let (count, reliability) = groups[claim.key.as_str()];
        let better = match winner {
            None => true,
            Some((_, best_count, best_reliability)) => {
                count > best_count || (count == best_count && reliability > best_reliability)
            }
        };
        if better {
            winner = Some((claim, count, reliability));
        }
    }
    let (winning, winning_count, _) = winner?;

    let total = claims.len() as f64;
    let sources = claims
        .iter()
        .map(|claim| SourceEvidence {
            source: claim.response.output.provider_id.clone(),
            reliability: claim.response.reliability,
            freshness_days: age_days(claim.response.output.as_of, now),
            verification: if claim.response.output.citations.is_empty() {
                UNCITED_VERIFICATION
            } else {
                CITED_VERIFICATION
            },
            agreement: groups[claim.key.as_str()].0 as f64 / total,
        })
        .collect();

    Some(Fact {
        field: field.to_string(),
        value: winning.value.clone(),
        sources,
        ai_consensus: Some(winning_count as f64 / responses.len() as f64),
    })
}

/// Raw payload for the merge: the merged fact values plus the first
/// provider-supplied quality score, if any.
pub fn build_payload(facts: &[Fact], responses: &[ProviderResponse]) -> RawAnalysisPayload {
    let data_quality_score = responses
        .iter()
        .filter_map(|r| r.output.claims.get(QUALITY_CLAIM).and_then(Value::as_f64))
        .find(|q| q.is_finite());

    RawAnalysisPayload {
        fields: facts
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect(),
        data_quality_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn response(
        provider: &str,
        reliability: f64,
        claims: &[(&str, Value)],
        cited: bool,
    ) -> ProviderResponse {
        ProviderResponse {
            output: GeneratorOutput {
                provider_id: provider.to_string(),
                claims: claims
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                confidence_score: None,
                citations: if cited {
                    vec!["https://example.com".to_string()]
                } else {
                    vec![]
                },
                as_of: None,
            },
            reliability,
        }
    }

    #[test]
    fn test_majority_value_and_agreement() {
        let responses = vec![
            response("openai", 0.9, &[("industry", Value::from("Retail"))], true),
            response("perplexity", 0.8, &[("industry", Value::from(" retail "))], false),
            response("ollama", 0.6, &[("industry", Value::from("Logistics"))], false),
        ];

        let facts = build_facts(&responses, Utc::now());
        assert_eq!(facts.len(), 1);

        let fact = &facts[0];
        assert_eq!(fact.value, Value::from("Retail"));
        assert!((fact.ai_consensus.unwrap() - 2.0 / 3.0).abs() < 1e-9);

        let agreement: Vec<f64> = fact.sources.iter().map(|s| s.agreement).collect();
        assert!((agreement[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((agreement[2] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(fact.sources[0].verification, 1.0);
        assert_eq!(fact.sources[1].verification, 0.5);
    }

    #[test]
    fn test_tie_goes_to_more_reliable_provider() {
        let responses = vec![
            response("ollama", 0.6, &[("industry", Value::from("Logistics"))], false),
            response("openai", 0.9, &[("industry", Value::from("Retail"))], false),
        ];

        let facts = build_facts(&responses, Utc::now());
        assert_eq!(facts[0].value, Value::from("Retail"));
        assert_eq!(facts[0].ai_consensus, Some(0.5));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let responses = vec![
            response("a", 0.8, &[("founded_year", Value::from(1989))], false),
            response("b", 0.8, &[("founded_year", serde_json::json!(1989.0))], false),
        ];

        let facts = build_facts(&responses, Utc::now());
        assert_eq!(facts[0].ai_consensus, Some(1.0));
    }

    #[test]
    fn test_partial_coverage_lowers_consensus() {
        let responses = vec![
            response("a", 0.8, &[("name", Value::from("Acme")), ("ceo", Value::from("Wile"))], false),
            response("b", 0.8, &[("name", Value::from("Acme"))], false),
        ];

        let facts = build_facts(&responses, Utc::now());
        let ceo = facts.iter().find(|f| f.field == "ceo").unwrap();
        assert_eq!(ceo.sources.len(), 1);
        assert_eq!(ceo.sources[0].agreement, 1.0);
        assert_eq!(ceo.ai_consensus, Some(0.5));
    }

    #[test]
    fn test_freshness_from_as_of() {
        let now = Utc::now();
        let mut stale = response("a", 0.8, &[("industry", Value::from("Retail"))], false);
        stale.output.as_of = Some(now - Duration::days(30));
        let mut future = response("b", 0.8, &[("industry", Value::from("Retail"))], false);
        future.output.as_of = Some(now + Duration::days(3));

        let facts = build_facts(&[stale, future], now);
        assert!((facts[0].sources[0].freshness_days - 30.0).abs() < 1e-6);
        assert_eq!(facts[0].sources[1].freshness_days, 0.0);
    }

    #[test]
    fn test_payload_quality_claim() {
        let responses = vec![
            response("a", 0.8, &[("name", Value::from("Acme"))], false),
            response(
                "b",
                0.8,
                &[("name", Value::from("Acme")), (QUALITY_CLAIM, Value::from(72.5))],
                false,
            ),
        ];

        let facts = build_facts(&responses, Utc::now());
        assert!(facts.iter().all(|f| f.field != QUALITY_CLAIM));

        let payload = build_payload(&facts, &responses);
        assert_eq!(payload.data_quality_score, Some(72.5));
        assert_eq!(payload.fields["name"], Value::from("Acme"));
    }

    #[test]
    fn test_no_responses_no_facts() {
        assert!(build_facts(&[], Utc::now()).is_empty());
        assert_eq!(build_payload(&[], &[]).data_quality_score, None);
    }
}
