//! HTTP chat-completion generator.
//!
//! Speaks either the Ollama chat API or the OpenAI-compatible
//! chat-completions API, asks for a single JSON object of claims and parses
//! the answer leniently.

use super::{Generator, GeneratorOutput};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One role-tagged message of a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// OpenAI-compatible chat request.
#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

/// OpenAI-compatible chat response. Perplexity adds top-level citations.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// Generator backed by a chat-completion endpoint.
pub struct ChatGenerator {
    provider: ProviderConfig,
    temperature: f32,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl ChatGenerator {
    pub fn new(provider: ProviderConfig, temperature: f32) -> Result<Self> {
        let api_key = provider
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty());

        let http_client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "Initializing generator {} ({} at {})",
            provider.id, provider.model, provider.url
        );

        Ok(Self {
            provider,
            temperature,
            api_key,
            http_client,
        })
    }

    fn user_prompt(entity_name: &str) -> String {
        format!(
            "Research the business entity \"{}\" and report what you know about it.\n\n{}",
            entity_name, CLAIMS_FORMAT
        )
    }

    async fn ask_ollama(&self, entity_name: &str) -> Result<(String, Vec<String>)> {
        let url = format!("{}/api/chat", self.provider.url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: self.provider.model.clone(),
            messages: vec![
                ChatMessage::new("system", SYSTEM_PROMPT),
                ChatMessage::new("user", &Self::user_prompt(entity_name)),
            ],
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} API error {}: {}", self.provider.id, status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok((chat_response.message.content, Vec::new()))
    }

    async fn ask_openai(&self, entity_name: &str) -> Result<(String, Vec<String>)> {
        let url = format!(
            "{}/chat/completions",
            self.provider.url.trim_end_matches('/')
        );

        let request = CompletionRequest {
            model: self.provider.model.clone(),
            messages: vec![
                ChatMessage::new("system", SYSTEM_PROMPT),
                ChatMessage::new("user", &Self::user_prompt(entity_name)),
            ],
            temperature: self.temperature,
        };

        let mut builder = self.http_client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} API error {}: {}", self.provider.id, status, body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.provider.id))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no choices", self.provider.id))?;

        Ok((content, completion.citations))
    }

    fn describe_send_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow!("Request to {} timed out", self.provider.id)
        } else if e.is_connect() || e.is_builder() {
            PipelineError::GeneratorUnavailable {
                provider: self.provider.id.clone(),
                reason: format!("cannot connect to {}", self.provider.url),
            }
            .into()
        } else {
            anyhow!("Failed to send request to {}: {}", self.provider.id, e)
        }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    fn id(&self) -> &str {
        &self.provider.id
    }

    fn cost_per_call(&self) -> f64 {
        self.provider.cost_per_call_usd
    }

    fn reliability(&self) -> f64 {
        self.provider.reliability
    }

    fn ready(&self) -> Result<(), PipelineError> {
        if self.provider.kind == ProviderKind::Openai && self.api_key.is_none() {
            if let Some(var) = self.provider.api_key_env.as_deref() {
                return Err(PipelineError::GeneratorUnavailable {
                    provider: self.provider.id.clone(),
                    reason: format!("needs an API key in ${}", var),
                });
            }
        }
        Ok(())
    }

    async fn generate(&self, entity_name: &str) -> Result<GeneratorOutput> {
        self.ready()?;

        debug!("Asking {} about {}", self.provider.id, entity_name);
        let (content, citations) = match self.provider.kind {
            ProviderKind::Ollama => self.ask_ollama(entity_name).await?,
            ProviderKind::Openai => self.ask_openai(entity_name).await?,
        };

        let mut output = parse_claims(&self.provider.id, &content)?;
        for citation in citations {
            if !output.citations.contains(&citation) {
                output.citations.push(citation);
            }
        }

        debug!(
            "{} returned {} claims for {}",
            self.provider.id,
            output.claims.len(),
            entity_name
        );
        Ok(output)
    }
}

/// Keys that describe the answer rather than the entity.
const META_KEYS: &[&str] = &["confidence_score", "citations", "sources", "as_of"];

/// Parse a model answer into claims.
///
/// Accepts bare JSON, JSON inside a code fence or surrounded by prose, and
/// either a `{"claims": {...}}` envelope or a flat object.
pub fn parse_claims(provider_id: &str, content: &str) -> Result<GeneratorOutput> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => return Err(anyhow!("{} answer contains no JSON object", provider_id)),
    };

    let root: Map<String, Value> = serde_json::from_str(json)
        .with_context(|| format!("{} answer is not a JSON object", provider_id))?;

    let claims: BTreeMap<String, Value> = match root.get("claims") {
        Some(Value::Object(inner)) => inner.clone().into_iter().collect(),
        _ => root
            .iter()
            .filter(|(k, _)| !META_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };

    let claims = claims.into_iter().filter(|(_, v)| !v.is_null()).collect();

    let confidence_score = root
        .get("confidence_score")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 100.0));

    let citations = ["citations", "sources"]
        .iter()
        .filter_map(|k| root.get(*k).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect();

    let as_of = root.get("as_of").and_then(Value::as_str).and_then(parse_date);

    Ok(GeneratorOutput {
        provider_id: provider_id.to_string(),
        claims,
        confidence_score,
        citations,
        as_of,
    })
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|n| n.and_utc())
        })
}

const SYSTEM_PROMPT: &str = r#"You are a business research analyst.
Answer with one JSON object only, no markdown and no explanations.
Use null for anything you do not know. Never invent figures."#;

const CLAIMS_FORMAT: &str = r#"Respond with exactly this JSON shape:
{"claims": {"name": "...", "industry": "...", "founded_year": 2010, "headquarters_location": "...",
"employee_count": 0, "funding_total": "...", "latest_funding_round": "...", "market_cap": "...",
"stock_price": null, "key_products": ["..."], "competitors": ["..."], "news_sentiment": "positive|neutral|negative"},
"confidence_score": 0-100, "citations": ["https://..."], "as_of": "YYYY-MM-DD"}"#;
