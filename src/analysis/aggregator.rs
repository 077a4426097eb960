//! Record merging and statistics.
//!
//! This module folds one analysis pass into an [`AggregatedRecord`] and
//! merges it with whatever was stored for the entity before.

use crate::config::ScoringConfig;
use crate::models::{
    round2, AggregatedRecord, AnalysisResult, AnalysisStatus, ProvenanceMap, ProviderResult,
    RawAnalysisPayload, TrustResult,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// Confidence reported when no quality input exists at all.
pub const DEFAULT_CONFIDENCE: f64 = 75.0;

/// Field whose presence marks a payload as identifying its entity.
pub const CANONICAL_FIELD: &str = "name";

/// Mean of the available quality inputs, 75 when there are none.
pub fn overall_confidence(payload: &RawAnalysisPayload, provider_results: &[ProviderResult]) -> f64 {
    let inputs: Vec<f64> = payload
        .data_quality_score
        .into_iter()
        .chain(provider_results.iter().filter_map(|r| r.confidence_score))
        .filter(|v| v.is_finite())
        .collect();

    if inputs.is_empty() {
        return DEFAULT_CONFIDENCE;
    }

    round2(inputs.iter().sum::<f64>() / inputs.len() as f64)
}

fn has_canonical_field(fields: &BTreeMap<String, Value>) -> bool {
    match fields.get(CANONICAL_FIELD) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn push_unique(into: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// Builds records from analysis payloads.
#[derive(Debug, Clone)]
pub struct Aggregator {
    scoring: ScoringConfig,
}

impl Aggregator {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    /// Record-level dimension scores.
    ///
    /// Freshness and relevance are baselines from config, not measured yet.
    pub fn field_scores(&self, payload: &RawAnalysisPayload) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("completeness".to_string(), self.completeness(&payload.fields)),
            (
                "accuracy".to_string(),
                payload.data_quality_score.unwrap_or(DEFAULT_CONFIDENCE),
            ),
            ("freshness".to_string(), self.scoring.freshness_baseline),
            ("relevance".to_string(), self.scoring.relevance_baseline),
        ])
    }

    fn completeness(&self, fields: &BTreeMap<String, Value>) -> f64 {
        if has_canonical_field(fields) {
            self.scoring.completeness_present
        } else {
            self.scoring.completeness_missing
        }
    }

    /// Fold one pass into a fresh record. The record is `failed` when no
    /// provider contributed.
    pub fn aggregate(
        &self,
        entity_id: &str,
        payload: &RawAnalysisPayload,
        provider_results: &[ProviderResult],
    ) -> AggregatedRecord {
        let now = Utc::now();

        let mut sources: Vec<String> = Vec::new();
        push_unique(
            &mut sources,
            provider_results.iter().flat_map(|r| r.citations.iter().cloned()),
        );
        let providers: Vec<String> = provider_results
            .iter()
            .map(|r| r.provider_id.clone())
            .collect();

        let entity_name = payload
            .fields
            .get(CANONICAL_FIELD)
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| entity_id.to_string());

        AggregatedRecord {
            entity_id: entity_id.to_string(),
            entity_name,
            status: if provider_results.is_empty() {
                AnalysisStatus::Failed
            } else {
                AnalysisStatus::Completed
            },
            fields: payload.fields.clone(),
            overall_confidence: overall_confidence(payload, provider_results),
            field_scores: self.field_scores(payload),
            fact_scores: BTreeMap::new(),
            provenance_map: ProvenanceMap {
                provider_count: providers.len(),
                sources,
                providers,
                created_at: now,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a fresh record over the stored one, field by field.
    ///
    /// Fresh values win and fields the fresh pass did not produce are kept.
    /// Provenance accumulates every provider and source that ever
    /// contributed, and completeness is judged on the merged fields. A pass
    /// no provider contributed to only touches `updated_at`.
    pub fn merge(
        &self,
        existing: Option<AggregatedRecord>,
        fresh: AggregatedRecord,
    ) -> AggregatedRecord {
        let Some(mut merged) = existing else {
            return fresh;
        };

        if fresh.provenance_map.providers.is_empty() {
            merged.updated_at = fresh.updated_at.max(merged.updated_at);
            return merged;
        }

        merged.fields.extend(fresh.fields);
        merged.fact_scores.extend(fresh.fact_scores);
        merged.entity_name = fresh.entity_name;
        merged.status = fresh.status;
        merged.overall_confidence = fresh.overall_confidence;
        merged.field_scores = fresh.field_scores;
        merged
            .field_scores
            .insert("completeness".to_string(), self.completeness(&merged.fields));

        let provenance = &mut merged.provenance_map;
        push_unique(&mut provenance.providers, fresh.provenance_map.providers);
        push_unique(&mut provenance.sources, fresh.provenance_map.sources);
        provenance.provider_count = provenance.providers.len();

        merged.updated_at = fresh.updated_at.max(merged.created_at);
        merged
    }
}

/// The lowest-scoring facts across a run, weakest first.
pub fn weakest_facts(results: &[AnalysisResult], n: usize) -> Vec<(&str, &str, &TrustResult)> {
    let mut facts: Vec<(&str, &str, &TrustResult)> = results
        .iter()
        .flat_map(|r| {
            r.fact_scores
                .iter()
                .map(move |(field, trust)| (r.name.as_str(), field.as_str(), trust))
        })
        .collect();

    facts.sort_by(|a, b| {
        a.2.score
            .partial_cmp(&b.2.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    facts.truncate(n);
    facts
}

/// Mean data quality over completed entities.
pub fn mean_quality(results: &[AnalysisResult]) -> Option<f64> {
    let completed: Vec<f64> = results
        .iter()
        .filter(|r| r.status == AnalysisStatus::Completed)
        .map(|r| r.data_quality_score)
        .collect();

    if completed.is_empty() {
        None
    } else {
        Some(round2(completed.iter().sum::<f64>() / completed.len() as f64))
    }
}
