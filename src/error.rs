//! Error taxonomy for the aggregation pipeline.
//!
//! Application edges (config, HTTP, file IO) use `anyhow`; the pipeline
//! itself reports gate and storage outcomes through [`PipelineError`] so
//! callers can tell a rate-limit rejection from a budget rejection.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the gating, scoring and storage layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A rate-limit tier rejected the call before dispatch.
    #[error("Rate limit exceeded for {identity} on {operation} (resets at {reset_time})")]
    RateLimitExceeded {
        identity: String,
        operation: String,
        reset_time: DateTime<Utc>,
    },

    /// The monthly budget would be exceeded by the projected cost.
    #[error(
        "Budget exceeded for {identity}: spent ${current_spend:.2} + projected ${projected:.2} > limit ${limit:.2}"
    )]
    BudgetExceeded {
        identity: String,
        current_spend: f64,
        projected: f64,
        limit: f64,
    },

    /// A single provider call failed or timed out.
    #[error("Generator {provider} failed: {reason}")]
    GeneratorFailure { provider: String, reason: String },

    /// The request never left this process (missing key, connection refused).
    #[error("Generator {provider} unavailable: {reason}")]
    GeneratorUnavailable { provider: String, reason: String },

    /// A fact could not be scored.
    #[error("Scoring error: {0}")]
    ScoringError(String),

    /// Upsert or ledger write failed.
    #[error("Storage error: {0}")]
    StorageFailure(String),
}

impl PipelineError {
    /// True for rejections raised before any money-incurring call.
    pub fn is_gate_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::RateLimitExceeded { .. } | PipelineError::BudgetExceeded { .. }
        )
    }

    /// True when a generator error means no request reached the provider.
    pub fn is_undispatched(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::GeneratorUnavailable { .. })
        )
    }
}
