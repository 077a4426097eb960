//! JSON snapshot store.
//!
//! Keeps the whole state in memory and rewrites the snapshot file after
//! every write, so records and spend survive between CLI invocations.

use super::{Store, StoreState};
use crate::error::PipelineError;
use crate::models::{AggregatedRecord, CostLedgerEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Store persisted as a single JSON document.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist.
    ///
    /// Any other failure to reach the file is an error, so an unreadable
    /// snapshot is never replaced by an empty one.
    pub async fn open(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to access store file: {}", path.display()))?;
        let state = if exists {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            let state: StoreState = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store file: {}", path.display()))?;
            info!(
                "Loaded store from {} ({} records, {} ledger entries)",
                path.display(),
                state.records.len(),
                state.ledger.len()
            );
            state
        } else {
            debug!("No store at {}, starting empty", path.display());
            StoreState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), PipelineError> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| PipelineError::StorageFailure(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(&self.path, e))?;
        }

        // Write-then-rename so a crash never leaves a truncated snapshot
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error(&self.path, e))
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::StorageFailure(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl Store for JsonFileStore {
    async fn get(&self, entity_id: &str) -> Result<Option<AggregatedRecord>, PipelineError> {
        Ok(self.state.lock().await.records.get(entity_id).cloned())
    }

    async fn upsert(&self, entity_id: &str, record: AggregatedRecord) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.records.insert(entity_id.to_string(), record);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn append_ledger_entry(&self, entry: CostLedgerEntry) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.ledger.push(entry);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn sum_ledger(
        &self,
        identity: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, PipelineError> {
        Ok(self.state.lock().await.sum_ledger(identity, start, end))
    }

    async fn ledger_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<CostLedgerEntry>, PipelineError> {
        Ok(self.state.lock().await.ledger_for_entity(entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, ProvenanceMap};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(entity_id: &str) -> AggregatedRecord {
        let now = Utc::now();
        AggregatedRecord {
            entity_id: entity_id.to_string(),
            entity_name: "Acme Co".to_string(),
            status: AnalysisStatus::Completed,
            fields: BTreeMap::new(),
            overall_confidence: 85.0,
            field_scores: BTreeMap::new(),
            fact_scores: BTreeMap::new(),
            provenance_map: ProvenanceMap {
                sources: vec![],
                providers: vec!["openai".to_string()],
                provider_count: 1,
                created_at: now,
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.upsert("acme-co", record("acme-co")).await.unwrap();
            store
                .append_ledger_entry(CostLedgerEntry::new("alice", 0.75).for_entity("acme-co"))
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let loaded = reopened.get("acme-co").await.unwrap().unwrap();
        assert_eq!(loaded.overall_confidence, 85.0);
        assert_eq!(reopened.ledger_for_entity("acme-co").await.unwrap().len(), 1);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(JsonFileStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        // Stat fails with ENOTDIR rather than "not found"
        let err = JsonFileStore::open(&blocker.join("store.json")).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to access store file"));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("store.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        // The snapshot directory can no longer be created
        std::fs::write(dir.path().join("sub"), "in the way").unwrap();

        let ledger = store
            .append_ledger_entry(CostLedgerEntry::new("alice", 0.5).for_entity("acme-co"))
            .await;
        assert!(matches!(ledger, Err(PipelineError::StorageFailure(_))));
        let upsert = store.upsert("acme-co", record("acme-co")).await;
        assert!(matches!(upsert, Err(PipelineError::StorageFailure(_))));

        assert!(store.get("acme-co").await.unwrap().is_none());
        assert!(store.ledger_for_entity("acme-co").await.unwrap().is_empty());
        let (start, end) = crate::governance::cost::month_bounds(Utc::now());
        assert_eq!(store.sum_ledger("alice", start, end).await.unwrap(), 0.0);
    }
}
