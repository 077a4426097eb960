//! Record and ledger storage.
//!
//! The pipeline only talks to the [`Store`] trait. Two implementations are
//! provided: an in-memory store and a JSON snapshot file for the CLI.

pub mod file;

pub use file::JsonFileStore;

use crate::error::PipelineError;
use crate::models::{AggregatedRecord, CostLedgerEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Durable storage boundary for aggregated records and the cost ledger.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, entity_id: &str) -> Result<Option<AggregatedRecord>, PipelineError>;

    async fn upsert(&self, entity_id: &str, record: AggregatedRecord) -> Result<(), PipelineError>;

    /// Append one ledger entry. Entries are never mutated or removed.
    async fn append_ledger_entry(&self, entry: CostLedgerEntry) -> Result<(), PipelineError>;

    /// Sum of an identity's entries with `start <= timestamp < end`.
    async fn sum_ledger(
        &self,
        identity: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, PipelineError>;

    async fn ledger_for_entity(&self, entity_id: &str)
        -> Result<Vec<CostLedgerEntry>, PipelineError>;
}

/// Everything a store holds; also the on-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub records: BTreeMap<String, AggregatedRecord>,
    #[serde(default)]
    pub ledger: Vec<CostLedgerEntry>,
}

impl StoreState {
    fn sum_ledger(&self, identity: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        self.ledger
            .iter()
            .filter(|e| e.identity == identity && e.timestamp >= start && e.timestamp < end)
            .map(|e| e.amount_usd)
            .sum()
    }

    fn ledger_for_entity(&self, entity_id: &str) -> Vec<CostLedgerEntry> {
        self.ledger
            .iter()
            .filter(|e| e.related_entity_id.as_deref() == Some(entity_id))
            .cloned()
            .collect()
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries held.
    #[allow(dead_code)] // Used by tests and diagnostics
    pub async fn ledger_len(&self) -> usize {
        self.state.read().await.ledger.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, entity_id: &str) -> Result<Option<AggregatedRecord>, PipelineError> {
        Ok(self.state.read().await.records.get(entity_id).cloned())
    }

    async fn upsert(&self, entity_id: &str, record: AggregatedRecord) -> Result<(), PipelineError> {
        self.state
            .write()
            .await
            .records
            .insert(entity_id.to_string(), record);
        Ok(())
    }

    async fn append_ledger_entry(&self, entry: CostLedgerEntry) -> Result<(), PipelineError> {
        self.state.write().await.ledger.push(entry);
        Ok(())
    }

    async fn sum_ledger(
        &self,
        identity: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, PipelineError> {
        Ok(self.state.read().await.sum_ledger(identity, start, end))
    }

    async fn ledger_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<CostLedgerEntry>, PipelineError> {
        Ok(self.state.read().await.ledger_for_entity(entity_id))
    }
}
