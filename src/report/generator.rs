//! Markdown and JSON report generation.

use crate::analysis::{mean_quality, weakest_facts};
use crate::models::{AnalysisResult, AnalysisStatus, Report, ReportMetadata, RunSummary, TrustTier};
use anyhow::Result;
use serde_json::Value;

/// Facts listed under "Needs Review".
const REVIEW_LIMIT: usize = 10;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# RivalScope Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_warnings_section(&report.warnings));
    output.push_str(&generate_review_section(&report.results));
    output.push_str(&generate_entities_section(&report.results));
    output.push_str("---\n\n*Report generated by RivalScope*\n");

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Session:** `{}`\n", metadata.session_id));
    section.push_str(&format!("- **Identity:** {}\n", metadata.identity));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if !metadata.providers.is_empty() {
        section.push_str(&format!(
            "- **Providers:** {}\n",
            metadata
                .providers
                .iter()
                .map(|p| format!("`{}`", p))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    section.push_str(&format!("- **Cost:** ${:.4}\n", metadata.total_cost_usd));
    section.push_str(&format!("- **Duration:** {:.1}s\n\n", metadata.duration_seconds));

    section
}

fn generate_summary_section(report: &Report) -> String {
    let summary: &RunSummary = &report.summary;
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    if let Some(error) = &report.error {
        section.push_str(&format!("> **Run failed:** {}\n\n", error));
    }

    section.push_str("| Entities | Completed | Failed |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        summary.entities, summary.completed, summary.failed
    ));

    section.push_str("### Fact Trust\n\n");
    section.push_str(&format!(
        "| {} High | {} Medium | {} Low |\n",
        TrustTier::High.emoji(),
        TrustTier::Medium.emoji(),
        TrustTier::Low.emoji()
    ));
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} |\n\n",
        summary.high_trust_facts, summary.medium_trust_facts, summary.low_trust_facts
    ));

    if let Some(quality) = mean_quality(&report.results) {
        section.push_str(&format!("Mean data quality: **{:.2}**\n\n", quality));
    }

    section
}

fn generate_warnings_section(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::from("## Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!("- {}\n", warning));
    }
    section.push('\n');
    section
}

fn generate_review_section(results: &[AnalysisResult]) -> String {
    let low: Vec<_> = weakest_facts(results, REVIEW_LIMIT)
        .into_iter()
        .filter(|(_, _, trust)| trust.tier == TrustTier::Low)
        .collect();

    if low.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Needs Review\n\n");
    section.push_str("| Entity | Field | Trust | Tier |\n");
    section.push_str("|:---|:---|:---:|:---:|\n");
    for (entity, field, trust) in low {
        section.push_str(&format!(
            "| {} | `{}` | {:.2} | {} |\n",
            escape_cell(entity),
            field,
            trust.score,
            trust.tier.as_str()
        ));
    }
    section.push('\n');
    section
}

fn generate_entities_section(results: &[AnalysisResult]) -> String {
    let mut section = String::from("## Entities\n\n");

    if results.is_empty() {
        section.push_str("No entities were analyzed.\n\n");
        return section;
    }

    for result in results {
        section.push_str(&generate_entity_block(result));
    }

    section
}

fn generate_entity_block(result: &AnalysisResult) -> String {
    let mut block = String::new();

    let badge = match result.status {
        AnalysisStatus::Completed => "✅",
        AnalysisStatus::Failed => "❌",
    };
    block.push_str(&format!("### {} {}\n\n", badge, result.name));
    block.push_str(&format!(
        "*Id: `{}` | Status: {} | Data quality: {:.2} | Cost to date: ${:.4}*\n\n",
        result.entity_id, result.status, result.data_quality_score, result.cost_usd
    ));

    if !result.providers_used.is_empty() {
        block.push_str(&format!(
            "**Providers:** {}\n\n",
            result.providers_used.join(", ")
        ));
    }

    if !result.skip_reasons.is_empty() {
        block.push_str("**Skipped:**\n\n");
        for (provider, reason) in &result.skip_reasons {
            block.push_str(&format!("- `{}`: {}\n", provider, reason));
        }
        block.push('\n');
    }

    if !result.fields.is_empty() {
        block.push_str("| Field | Value | Trust |\n");
        block.push_str("|:---|:---|:---:|\n");
        for (field, value) in &result.fields {
            let trust = result
                .fact_scores
                .get(field)
                .map(|t| format!("{} {:.2}", t.tier.emoji(), t.score))
                .unwrap_or_else(|| "-".to_string());
            block.push_str(&format!(
                "| `{}` | {} | {} |\n",
                field,
                escape_cell(&display_value(value)),
                trust
            ));
        }
        block.push('\n');
    }

    if !result.field_scores.is_empty() {
        let scores: Vec<String> = result
            .field_scores
            .iter()
            .map(|(dimension, score)| format!("{} {:.0}", dimension, score))
            .collect();
        block.push_str(&format!("*Record scores: {}*\n\n", scores.join(" | ")));
    }

    block.push_str("---\n\n");
    block
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRun, TrustComponents, TrustResult};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn trust(score: f64) -> TrustResult {
        TrustResult {
            score,
            tier: TrustTier::from_score(score),
            components: TrustComponents {
                evidence: 0.0,
                calibration: 1.5,
                consensus_bonus: 1.0,
                consensus: 0.0,
                consensus_weight: 0.15,
                half_life_days: 90.0,
            },
        }
    }

    fn create_test_report() -> Report {
        let acme = AnalysisResult {
            name: "Acme Co".to_string(),
            entity_id: "acme-co".to_string(),
            status: AnalysisStatus::Completed,
            fields: BTreeMap::from([
                ("industry".to_string(), Value::from("Retail | Wholesale")),
                ("founded_year".to_string(), Value::from(1989)),
            ]),
            data_quality_score: 85.0,
            providers_used: vec!["openai".to_string(), "perplexity".to_string()],
            providers_skipped: vec!["ollama".to_string()],
            skip_reasons: BTreeMap::from([(
                "ollama".to_string(),
                "Generator ollama failed: connection refused".to_string(),
            )]),
            fact_scores: BTreeMap::from([
                ("industry".to_string(), trust(88.0)),
                ("founded_year".to_string(), trust(41.5)),
            ]),
            field_scores: BTreeMap::from([("completeness".to_string(), 50.0)]),
            cost_usd: 0.03,
        };

        let run = AnalysisRun {
            session_id: Uuid::new_v4(),
            success: true,
            results: vec![acme],
            error: None,
            warnings: vec!["Acme Co: record not stored: Storage error: disk full".to_string()],
            identity: "alice".to_string(),
            total_cost_usd: 0.03,
            started_at: Utc::now(),
            duration_seconds: 2.5,
        };

        Report::from_run(run, vec!["openai".to_string(), "perplexity".to_string(), "ollama".to_string()])
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# RivalScope Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Identity:** alice"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Warnings"));
        assert!(markdown.contains("### ✅ Acme Co"));
        assert!(markdown.contains("Retail \\| Wholesale"));
        assert!(markdown.contains("| `founded_year` | 1989 |"));
        assert!(markdown.contains("connection refused"));
        assert!(markdown.contains("Mean data quality: **85.00**"));
    }

    #[test]
    fn test_review_lists_only_low_trust() {
        let markdown = generate_markdown_report(&create_test_report());
        let review = markdown
            .split("## Needs Review")
            .nth(1)
            .and_then(|rest| rest.split("## Entities").next())
            .unwrap();

        assert!(review.contains("`founded_year`"));
        assert!(!review.contains("`industry`"));
    }

    #[test]
    fn test_failed_run_banner() {
        let mut report = create_test_report();
        report.success = false;
        report.error = Some("All 1 entities failed: no provider produced claims".to_string());
        report.results[0].status = AnalysisStatus::Failed;

        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("> **Run failed:**"));
        assert!(markdown.contains("### ❌ Acme Co"));
    }

    #[test]
    fn test_empty_report() {
        let mut report = create_test_report();
        report.results.clear();
        report.warnings.clear();
        report.summary = RunSummary::from_results(&report.results);

        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("No entities were analyzed."));
        assert!(!markdown.contains("## Warnings"));
        assert!(!markdown.contains("Mean data quality"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["metadata"]["identity"], "alice");
        assert_eq!(parsed["summary"]["completed"], 1);
        assert_eq!(parsed["results"][0]["status"], "completed");
        assert_eq!(parsed["results"][0]["fact_scores"]["industry"]["tier"], "high");
    }
}
