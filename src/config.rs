//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.rivalscope.toml` files.

use crate::governance::rate_limit::GLOBAL_IDENTITY;
use crate::governance::{Budgets, RateLimitPolicy};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".rivalscope.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Generator call settings.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Providers available for analysis.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Rate limit settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Monthly budget settings.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Record scoring baselines.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Storage settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            generator: GeneratorConfig::default(),
            providers: default_providers(),
            rate_limit: RateLimitConfig::default(),
            budget: BudgetConfig::default(),
            scoring: ScoringConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of entities analyzed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Identity that spend and rate limits are attributed to.
    #[serde(default = "default_identity")]
    pub identity: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
            identity: default_identity(),
        }
    }
}

fn default_output() -> String {
    "rivalscope_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_identity() -> String {
    "local".to_string()
}

/// Settings shared by every generator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            temperature: default_temperature(),
        }
    }
}

fn default_timeout() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.1
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama `/api/chat`.
    Ollama,
    /// OpenAI-compatible `{url}/chat/completions` (OpenAI, Perplexity).
    Openai,
}

/// One AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in provenance and the ledger.
    pub id: String,

    pub kind: ProviderKind,

    /// Base URL of the API.
    pub url: String,

    pub model: String,

    /// Environment variable holding the API key, if one is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Estimated cost of one call in USD.
    #[serde(default)]
    pub cost_per_call_usd: f64,

    /// General trust in this provider's claims (0..=1).
    #[serde(default = "default_reliability")]
    pub reliability: f64,
}

fn default_reliability() -> f64 {
    0.8
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "openai".to_string(),
            kind: ProviderKind::Openai,
            url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            cost_per_call_usd: 0.02,
            reliability: 0.85,
        },
        ProviderConfig {
            id: "perplexity".to_string(),
            kind: ProviderKind::Openai,
            url: "https://api.perplexity.ai".to_string(),
            model: "sonar".to_string(),
            api_key_env: Some("PERPLEXITY_API_KEY".to_string()),
            cost_per_call_usd: 0.01,
            reliability: 0.8,
        },
        ProviderConfig {
            id: "ollama".to_string(),
            kind: ProviderKind::Ollama,
            url: "http://localhost:11434".to_string(),
            model: "llama3.2:latest".to_string(),
            api_key_env: None,
            cost_per_call_usd: 0.0,
            reliability: 0.6,
        },
    ]
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests per window across all identities, per operation.
    #[serde(default = "default_global_max")]
    pub global_max_requests: u32,

    /// Requests per window for one identity, per operation.
    #[serde(default = "default_identity_max")]
    pub identity_max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            global_max_requests: default_global_max(),
            identity_max_requests: default_identity_max(),
        }
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_global_max() -> u32 {
    120
}

fn default_identity_max() -> u32 {
    30
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            global_max_requests: config.global_max_requests,
            identity_max_requests: config.identity_max_requests,
        }
    }
}

/// Monthly budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Monthly cap in USD for identities without an override.
    #[serde(default = "default_monthly_usd")]
    pub default_monthly_usd: f64,

    /// Per-identity monthly caps.
    #[serde(default)]
    pub overrides: HashMap<String, f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_monthly_usd: default_monthly_usd(),
            overrides: HashMap::new(),
        }
    }
}

fn default_monthly_usd() -> f64 {
    25.0
}

impl From<&BudgetConfig> for Budgets {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            default_monthly_usd: config.default_monthly_usd,
            overrides: config.overrides.clone(),
        }
    }
}

/// Baselines for the record-level dimension scores.
///
/// TODO: freshness and relevance are fixed placeholders until real
/// signals (source age, query match) feed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Completeness when the entity's name was resolved.
    #[serde(default = "default_completeness_present")]
    pub completeness_present: f64,

    /// Completeness when it was not.
    #[serde(default = "default_completeness_missing")]
    pub completeness_missing: f64,

    #[serde(default = "default_freshness_baseline")]
    pub freshness_baseline: f64,

    #[serde(default = "default_relevance_baseline")]
    pub relevance_baseline: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            completeness_present: default_completeness_present(),
            completeness_missing: default_completeness_missing(),
            freshness_baseline: default_freshness_baseline(),
            relevance_baseline: default_relevance_baseline(),
        }
    }
}

fn default_completeness_present() -> f64 {
    85.0
}

fn default_completeness_missing() -> f64 {
    50.0
}

fn default_freshness_baseline() -> f64 {
    90.0
}

fn default_relevance_baseline() -> f64 {
    88.0
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON snapshot holding records and the ledger.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    ".rivalscope/store.json".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref identity) = args.identity {
            self.general.identity = identity.clone();
        }

        if let Some(timeout) = args.timeout {
            self.generator.timeout_seconds = timeout;
        }

        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        if let Some(budget) = args.budget {
            self.budget.default_monthly_usd = budget;
        }

        if let Some(ref store) = args.store {
            self.store.path = store.display().to_string();
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check settings that are only meaningful once file and flags are merged.
    pub fn validate(&self) -> Result<()> {
        let identity = self.general.identity.trim();
        if identity.is_empty() || identity == GLOBAL_IDENTITY {
            bail!(
                "Identity must be a non-empty name other than '{}' (got '{}')",
                GLOBAL_IDENTITY,
                self.general.identity
            );
        }

        if self.generator.timeout_seconds == 0 {
            bail!("[generator] timeout_seconds must be at least 1");
        }

        Ok(())
    }

    /// Providers to use: the requested ids in order, or all configured ones.
    pub fn select_providers(&self, requested: Option<&[String]>) -> Result<Vec<ProviderConfig>> {
        let Some(requested) = requested else {
            return Ok(self.providers.clone());
        };

        requested
            .iter()
            .map(|id| {
                self.providers
                    .iter()
                    .find(|p| p.id.eq_ignore_ascii_case(id))
                    .cloned()
                    .with_context(|| format!("Unknown provider '{}' (not in config)", id))
            })
            .collect()
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
