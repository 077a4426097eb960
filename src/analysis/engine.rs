//! Analysis orchestration.
//!
//! For every requested entity the engine gates each provider (rate limit,
//! then budget), dispatches the admitted calls concurrently under a
//! timeout, charges the ledger for what was dispatched, scores the claims
//! and upserts the merged record.

use crate::analysis::aggregator::Aggregator;
use crate::analysis::facts::{build_facts, build_payload, ProviderResponse};
use crate::analysis::progress::{percentage, ProgressReporter, ProgressStatus, ProgressUpdate};
use crate::config::{Config, ScoringConfig};
use crate::error::PipelineError;
use crate::governance::{CostGovernor, Reservation, TieredRateLimiter};
use crate::generator::Generator;
use crate::models::{
    entity_id_for, AggregatedRecord, AnalysisResult, AnalysisRun, AnalysisStatus,
    CostLedgerEntry, ProviderResult, TrustResult,
};
use crate::store::Store;
use crate::trust;
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Execution knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Upper bound on a single generator call.
    pub call_timeout: Duration,
    /// Entities analyzed at once.
    pub concurrency: usize,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.generator.timeout_seconds),
            concurrency: config.general.concurrency.max(1),
        }
    }
}

/// Per-entity outcome before it is folded into the run.
struct EntityOutcome {
    result: AnalysisResult,
    warnings: Vec<String>,
    spent_usd: f64,
}

/// Provider calls that made it through both gates.
struct Admission {
    admitted: Vec<(Arc<dyn Generator>, Reservation)>,
    skipped: Vec<(String, String)>,
    /// Gate failures that were not policy rejections (ledger unreadable).
    errors: Vec<String>,
}

pub struct AnalysisEngine {
    store: Arc<dyn Store>,
    limiter: TieredRateLimiter,
    governor: CostGovernor,
    aggregator: Aggregator,
    settings: EngineSettings,
    entity_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn Store>,
        limiter: TieredRateLimiter,
        governor: CostGovernor,
        scoring: ScoringConfig,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            limiter,
            governor,
            aggregator: Aggregator::new(scoring),
            settings,
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn governor(&self) -> &CostGovernor {
        &self.governor
    }

    pub fn limiter(&self) -> &TieredRateLimiter {
        &self.limiter
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Analyze `entity_names` with the given generators on behalf of
    /// `identity`.
    ///
    /// Never fails as a whole: provider and storage problems degrade the
    /// affected entity and are reported on the returned run.
    pub async fn run_analysis(
        &self,
        identity: &str,
        entity_names: &[String],
        generators: &[Arc<dyn Generator>],
        progress: &ProgressReporter,
    ) -> AnalysisRun {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = entity_names.len();

        info!(
            "Session {}: {} entities, {} providers, identity {}",
            session_id,
            total,
            generators.len(),
            identity
        );

        let mut pending = stream::iter(entity_names.iter().enumerate())
            .map(|(index, name)| async move {
                (index, self.analyze_entity(identity, name, generators).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        let mut outcomes: Vec<(usize, EntityOutcome)> = Vec::with_capacity(total);
        while let Some((index, outcome)) = pending.next().await {
            let current = outcome.result.name.clone();
            outcomes.push((index, outcome));

            progress
                .report(ProgressUpdate {
                    session_id,
                    status: ProgressStatus::Running,
                    completed: outcomes.len(),
                    total,
                    percentage: percentage(outcomes.len(), total),
                    current_entity: Some(current),
                })
                .await;
        }
        drop(pending);

        outcomes.sort_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(total);
        let mut warnings = Vec::new();
        let mut total_cost_usd = 0.0;
        for (_, outcome) in outcomes {
            total_cost_usd += outcome.spent_usd;
            warnings.extend(outcome.warnings);
            results.push(outcome.result);
        }

        let completed = results
            .iter()
            .filter(|r| r.status == AnalysisStatus::Completed)
            .count();
        let success = completed > 0;
        let error = if success {
            None
        } else if total == 0 {
            Some("No entities were requested".to_string())
        } else {
            Some(format!("All {} entities failed: no provider produced claims", total))
        };

        progress
            .report(ProgressUpdate {
                session_id,
                status: ProgressStatus::Finished,
                completed: total,
                total,
                percentage: 100.0,
                current_entity: None,
            })
            .await;

        info!(
            "Session {} finished: {}/{} completed, ${:.4} spent",
            session_id, completed, total, total_cost_usd
        );

        AnalysisRun {
            session_id,
            success,
            results,
            error,
            warnings,
            identity: identity.to_string(),
            total_cost_usd: (total_cost_usd * 10_000.0).round() / 10_000.0,
            started_at,
            duration_seconds: clock.elapsed().as_secs_f64(),
        }
    }

    async fn analyze_entity(
        &self,
        identity: &str,
        name: &str,
        generators: &[Arc<dyn Generator>],
    ) -> EntityOutcome {
        let entity_id = entity_id_for(name);
        let mut warnings = Vec::new();
        info!("Analyzing {} ({})", name, entity_id);

        let Admission {
            admitted,
            mut skipped,
            errors,
        } = self.admit(identity, generators).await;
        warnings.extend(errors.into_iter().map(|e| format!("{}: {}", name, e)));

        let call_timeout = self.settings.call_timeout;
        let calls = admitted.into_iter().map(|(generator, reservation)| async move {
            let outcome = timeout(call_timeout, generator.generate(name)).await;
            (generator, reservation, outcome)
        });
        let settled = join_all(calls).await;

        let mut responses = Vec::new();
        let mut spent_usd = 0.0;
        for (generator, reservation, outcome) in settled {
            let provider = generator.id().to_string();
            let amount = reservation.amount_usd();

            let label = match &outcome {
                Ok(Ok(_)) => "ok",
                Ok(Err(e)) if PipelineError::is_undispatched(e) => "unsent",
                Ok(Err(_)) => "error",
                Err(_) => "timeout",
            };

            if label == "unsent" {
                // Never sent; dropping the reservation releases its hold
                drop(reservation);
            } else {
                let entry = CostLedgerEntry::new(identity, amount)
                    .for_entity(&entity_id)
                    .with_idempotency_key(Uuid::new_v4().to_string())
                    .with_metadata("provider", provider.as_str())
                    .with_metadata("outcome", label);

                spent_usd += amount;
                if let Err(e) = self.governor.settle(reservation, entry).await {
                    warnings.push(format!(
                        "{}: ledger entry for {} not recorded: {}",
                        name, provider, e
                    ));
                }
            }

            match outcome {
                Ok(Ok(mut output)) => {
                    output.provider_id = provider;
                    responses.push(ProviderResponse {
                        output,
                        reliability: generator.reliability(),
                    });
                }
                Ok(Err(e)) if PipelineError::is_undispatched(&e) => {
                    warn!("{:#}", e);
                    skipped.push((provider, format!("{:#}", e)));
                }
                Ok(Err(e)) => {
                    let failure = PipelineError::GeneratorFailure {
                        provider: provider.clone(),
                        reason: format!("{:#}", e),
                    };
                    warn!("{}", failure);
                    skipped.push((provider, failure.to_string()));
                }
                Err(_) => {
                    let reason = format!("timed out after {:?}", call_timeout);
                    warn!("{} {} for {}", provider, reason, name);
                    skipped.push((provider, reason));
                }
            }
        }

        let facts = build_facts(&responses, Utc::now());
        let fact_scores: BTreeMap<String, TrustResult> = facts
            .iter()
            .map(|fact| (fact.field.clone(), trust::score(fact)))
            .collect();
        let payload = build_payload(&facts, &responses);
        let provider_results: Vec<ProviderResult> = responses
            .iter()
            .map(|r| ProviderResult {
                provider_id: r.output.provider_id.clone(),
                confidence_score: r.output.confidence_score,
                citations: r.output.citations.clone(),
            })
            .collect();

        let mut record = self
            .aggregator
            .aggregate(&entity_id, &payload, &provider_results);
        record.entity_name = name.to_string();
        record.fact_scores = fact_scores.clone();

        let result = AnalysisResult {
            name: name.to_string(),
            entity_id: entity_id.clone(),
            status: record.status,
            fields: record.fields.clone(),
            data_quality_score: record.overall_confidence,
            providers_used: record.provenance_map.providers.clone(),
            providers_skipped: skipped.iter().map(|(p, _)| p.clone()).collect(),
            skip_reasons: skipped.into_iter().collect(),
            fact_scores,
            field_scores: record.field_scores.clone(),
            cost_usd: spent_usd,
        };

        if let Err(e) = self.upsert(&entity_id, record).await {
            warn!("Storing {} failed: {}", entity_id, e);
            warnings.push(format!("{}: record not stored: {}", name, e));
        }

        let cost_usd = match self.governor.entity_cost(&entity_id).await {
            Ok(cost) => cost,
            Err(e) => {
                warnings.push(format!("{}: cumulative cost unavailable: {}", name, e));
                spent_usd
            }
        };

        EntityOutcome {
            result: AnalysisResult { cost_usd, ..result },
            warnings,
            spent_usd,
        }
    }

    /// Run every generator through its readiness check, the rate limiter
    /// and then the budget.
    async fn admit(&self, identity: &str, generators: &[Arc<dyn Generator>]) -> Admission {
        let mut admitted = Vec::new();
        let mut skipped = Vec::new();
        let mut errors = Vec::new();

        for generator in generators {
            if let Err(e) = generator.ready() {
                warn!("Skipping {}: {}", generator.id(), e);
                skipped.push((generator.id().to_string(), e.to_string()));
                continue;
            }

            let operation = format!("generate:{}", generator.id());

            if let Err(e) = self.limiter.check(identity, &operation) {
                warn!("Skipping {}: {}", generator.id(), e);
                skipped.push((generator.id().to_string(), e.to_string()));
                continue;
            }

            match self.governor.reserve(identity, generator.cost_per_call()).await {
                Ok(reservation) => admitted.push((Arc::clone(generator), reservation)),
                Err(e) => {
                    warn!("Skipping {}: {}", generator.id(), e);
                    if !e.is_gate_rejection() {
                        errors.push(format!("budget check for {} failed: {}", generator.id(), e));
                    }
                    skipped.push((generator.id().to_string(), e.to_string()));
                }
            }
        }

        Admission {
            admitted,
            skipped,
            errors,
        }
    }

    fn entity_lock(&self, entity_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.entity_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(entity_id.to_string()).or_default())
    }

    /// Forget an entity's lock once no other writer holds or awaits it.
    fn release_entity_lock(&self, entity_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.entity_locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(entity_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.entity_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Merge and write one record while holding that entity's lock.
    async fn upsert(
        &self,
        entity_id: &str,
        record: AggregatedRecord,
    ) -> Result<(), PipelineError> {
        let lock = self.entity_lock(entity_id);
        let result = {
            let _guard = lock.lock().await;
            self.merge_and_store(entity_id, record).await
        };
        self.release_entity_lock(entity_id, lock);
        result
    }

    async fn merge_and_store(
        &self,
        entity_id: &str,
        record: AggregatedRecord,
    ) -> Result<(), PipelineError> {
        let existing = self.store.get(entity_id).await?;
        let merged = self.aggregator.merge(existing, record);
        self.store.upsert(entity_id, merged).await
    }
}
