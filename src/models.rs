//! Data models for the aggregation pipeline.
//!
//! This module contains the evidence, fact, trust and record structures
//! shared by the scoring engine, the aggregator and the report writer.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One generator's support for a claimed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvidence {
    /// Provider or source identifier.
    pub source: String,
    /// How much the source is trusted in general (0..=1).
    pub reliability: f64,
    /// Age of the evidence in days (>= 0).
    pub freshness_days: f64,
    /// Whether the claim is backed by citations (0..=1).
    pub verification: f64,
    /// Share of peers agreeing with this source's value (0..=1).
    pub agreement: f64,
}

/// A single claimed attribute of an entity with all its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub field: String,
    pub value: Value,
    pub sources: Vec<SourceEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_consensus: Option<f64>,
}

impl Fact {
    /// Checks the fact is well-formed enough to be scored.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.field.trim().is_empty() {
            return Err(PipelineError::ScoringError(
                "fact has an empty field name".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trust tier assigned from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Low,
    Medium,
    High,
}

impl TrustTier {
    /// Score at or above which a fact is high trust.
    pub const HIGH_THRESHOLD: f64 = 85.0;
    /// Score at or above which a fact is medium trust.
    pub const MEDIUM_THRESHOLD: f64 = 70.0;

    /// Tier for a 0-100 score.
    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            TrustTier::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            TrustTier::Medium
        } else {
            TrustTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::High => "high",
            TrustTier::Medium => "medium",
            TrustTier::Low => "low",
        }
    }

    /// Returns an emoji representation of the tier.
    pub fn emoji(&self) -> &'static str {
        match self {
            TrustTier::High => "🟢",
            TrustTier::Medium => "🟡",
            TrustTier::Low => "🔴",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustTier::High => write!(f, "High"),
            TrustTier::Medium => write!(f, "Medium"),
            TrustTier::Low => write!(f, "Low"),
        }
    }
}

/// Intermediate values of a trust computation, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustComponents {
    /// Accumulated evidence `E`.
    pub evidence: f64,
    /// Calibration constant `Z`.
    pub calibration: f64,
    /// Bonus multiplier `BA`.
    pub consensus_bonus: f64,
    /// Clamped consensus `CA`.
    pub consensus: f64,
    /// Consensus weight `λ`.
    pub consensus_weight: f64,
    /// Half-life `HL` in days.
    pub half_life_days: f64,
}

/// Result of scoring one fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustResult {
    pub score: f64,
    pub tier: TrustTier,
    pub components: TrustComponents,
}

/// Lifecycle status of an entity's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::Completed => write!(f, "completed"),
            AnalysisStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Which providers and sources contributed to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMap {
    pub sources: Vec<String>,
    pub providers: Vec<String>,
    pub provider_count: usize,
    pub created_at: DateTime<Utc>,
}

/// The merged, persisted per-entity result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub entity_id: String,
    pub entity_name: String,
    pub status: AnalysisStatus,
    pub fields: BTreeMap<String, Value>,
    pub overall_confidence: f64,
    pub field_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub fact_scores: BTreeMap<String, TrustResult>,
    pub provenance_map: ProvenanceMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Free-form attributes produced by one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalysisPayload {
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_score: Option<f64>,
}

/// Per-provider summary fed into the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// One immutable cost-incurring event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub id: Uuid,
    pub identity: String,
    pub amount_usd: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    /// Caller-supplied key for retry de-duplication by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CostLedgerEntry {
    pub fn new(identity: &str, amount_usd: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            amount_usd,
            timestamp: Utc::now(),
            related_entity_id: None,
            idempotency_key: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_entity(mut self, entity_id: &str) -> Self {
        self.related_entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Caller-facing outcome for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub entity_id: String,
    pub status: AnalysisStatus,
    pub fields: BTreeMap<String, Value>,
    pub data_quality_score: f64,
    pub providers_used: Vec<String>,
    pub providers_skipped: Vec<String>,
    /// Why each skipped provider was skipped.
    #[serde(default)]
    pub skip_reasons: BTreeMap<String, String>,
    #[serde(default)]
    pub fact_scores: BTreeMap<String, TrustResult>,
    #[serde(default)]
    pub field_scores: BTreeMap<String, f64>,
    /// Cumulative spend recorded against this entity.
    pub cost_usd: f64,
}

/// Caller-facing outcome for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub session_id: Uuid,
    pub success: bool,
    pub results: Vec<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal degradations (storage, ledger) observed during the run.
    #[serde(default)]
    pub warnings: Vec<String>,
    pub identity: String,
    pub total_cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Summary counts over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub entities: usize,
    pub completed: usize,
    pub failed: usize,
    pub high_trust_facts: usize,
    pub medium_trust_facts: usize,
    pub low_trust_facts: usize,
}

impl RunSummary {
    /// Creates a summary from a list of results.
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut summary = Self {
            entities: results.len(),
            ..Self::default()
        };

        for result in results {
            match result.status {
                AnalysisStatus::Completed => summary.completed += 1,
                AnalysisStatus::Failed => summary.failed += 1,
            }

            for trust in result.fact_scores.values() {
                match trust.tier {
                    TrustTier::High => summary.high_trust_facts += 1,
                    TrustTier::Medium => summary.medium_trust_facts += 1,
                    TrustTier::Low => summary.low_trust_facts += 1,
                }
            }
        }

        summary
    }
}

/// Metadata printed at the top of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub session_id: Uuid,
    pub identity: String,
    pub generated_at: DateTime<Utc>,
    /// Providers requested for the run, in configured order.
    pub providers: Vec<String>,
    pub total_cost_usd: f64,
    pub duration_seconds: f64,
}

/// A complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub summary: RunSummary,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub results: Vec<AnalysisResult>,
}

impl Report {
    /// Builds a report from a finished run.
    pub fn from_run(run: AnalysisRun, providers: Vec<String>) -> Self {
        Self {
            metadata: ReportMetadata {
                session_id: run.session_id,
                identity: run.identity,
                generated_at: Utc::now(),
                providers,
                total_cost_usd: run.total_cost_usd,
                duration_seconds: run.duration_seconds,
            },
            summary: RunSummary::from_results(&run.results),
            success: run.success,
            error: run.error,
            warnings: run.warnings,
            results: run.results,
        }
    }
}

/// Derives a stable entity id from a display name ("Acme Co" -> "acme-co").
///
/// Empty when the name has no letters or digits.
pub fn entity_id_for(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    id
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
