//! Claim generators (AI providers).
//!
//! The pipeline treats every provider as an opaque async call that either
//! returns a set of claims about an entity or fails.

pub mod chat;

pub use chat::ChatGenerator;

use crate::config::{GeneratorConfig, ProviderConfig};
use crate::error::PipelineError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Claims returned by one provider for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub provider_id: String,
    pub claims: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    /// URLs or references the provider cited.
    #[serde(default)]
    pub citations: Vec<String>,
    /// When the provider's information was current, if it said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

/// A source of claims about a business entity.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider identifier used in provenance and the ledger.
    fn id(&self) -> &str;

    /// Estimated USD cost of one `generate` call.
    fn cost_per_call(&self) -> f64;

    /// General trust in this provider's claims (0..=1).
    fn reliability(&self) -> f64;

    /// Whether a call could be sent right now. Checked before any gate, so
    /// an unready provider costs neither a rate-limit slot nor budget.
    fn ready(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Errors for calls that never reached the provider should be
    /// [`PipelineError::GeneratorUnavailable`]; those calls are not charged.
    async fn generate(&self, entity_name: &str) -> Result<GeneratorOutput>;
}

/// Build HTTP generators for the selected providers.
pub fn build_generators(
    providers: &[ProviderConfig],
    settings: &GeneratorConfig,
) -> Result<Vec<Arc<dyn Generator>>> {
    providers
        .iter()
        .map(|p| {
            let generator = ChatGenerator::new(p.clone(), settings.temperature)?;
            Ok(Arc::new(generator) as Arc<dyn Generator>)
        })
        .collect()
}
