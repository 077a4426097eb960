//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::entity_id_for;
use clap::Parser;
use std::path::PathBuf;

/// RivalScope - multi-provider business intelligence with trust scoring
///
/// Ask several AI providers about each entity, score every claimed fact
/// for trust, merge the answers into one record and write a report.
/// Calls are rate limited and charged against a monthly budget.
///
/// Examples:
///   rivalscope "Acme Co"
///   rivalscope "Acme Co" Globex --providers openai,perplexity
///   rivalscope Initech --identity team-a --format json -o initech.json
///   rivalscope "Acme Co" --dry-run
///   rivalscope --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Names of the entities to analyze
    #[arg(value_name = "ENTITY", required_unless_present = "init_config")]
    pub entities: Vec<String>,

    /// Providers to query (comma-separated ids from the config)
    ///
    /// Example: --providers openai,perplexity. Defaults to every configured provider.
    #[arg(short, long, value_name = "IDS", value_delimiter = ',')]
    pub providers: Option<Vec<String>>,

    /// Identity the calls are rate limited and billed under
    #[arg(short, long, value_name = "NAME", env = "RIVALSCOPE_IDENTITY")]
    pub identity: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .rivalscope.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Number of entities analyzed at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Monthly budget in USD for identities without an override
    #[arg(long, value_name = "USD")]
    pub budget: Option<f64>,

    /// Path of the JSON store holding records and the cost ledger
    #[arg(long, value_name = "FILE", env = "RIVALSCOPE_STORE")]
    pub store: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: show providers, costs and budget without calling anything
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .rivalscope.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.entities.is_empty() {
            return Err("At least one entity name is required".to_string());
        }

        if let Some(blank) = self.entities.iter().position(|e| e.trim().is_empty()) {
            return Err(format!("Entity #{} has an empty name", blank + 1));
        }

        if let Some(unnamed) = self.entities.iter().position(|e| entity_id_for(e).is_empty()) {
            return Err(format!(
                "Entity #{} ('{}') needs at least one letter or digit",
                unnamed + 1,
                self.entities[unnamed]
            ));
        }

        if let Some(ref providers) = self.providers {
            if providers.iter().any(|p| p.trim().is_empty()) {
                return Err("Provider ids must not be empty".to_string());
            }
        }

        if let Some(ref identity) = self.identity {
            if identity.trim().is_empty() || identity == "*" {
                return Err("Identity must be a non-empty name other than '*'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(budget) = self.budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err("Budget must be a non-negative amount".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            entities: vec!["Acme Co".to_string()],
            providers: None,
            identity: None,
            config: None,
            output: None,
            format: OutputFormat::Markdown,
            timeout: None,
            concurrency: None,
            budget: None,
            store: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_entities_and_providers() {
        let args = Args::try_parse_from([
            "rivalscope",
            "Acme Co",
            "Globex",
            "--providers",
            "openai,perplexity",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.entities, vec!["Acme Co", "Globex"]);
        assert_eq!(
            args.providers,
            Some(vec!["openai".to_string(), "perplexity".to_string()])
        );
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_entities_required_unless_init_config() {
        assert!(Args::try_parse_from(["rivalscope"]).is_err());
        assert!(Args::try_parse_from(["rivalscope", "--init-config"]).is_ok());
    }

    #[test]
    fn test_validation_ok() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_blank_entity() {
        let mut args = make_args();
        args.entities.push("  ".to_string());
        assert_eq!(
            args.validate(),
            Err("Entity #2 has an empty name".to_string())
        );
    }

    #[test]
    fn test_validation_rejects_punctuation_only_entity() {
        let mut args = make_args();
        args.entities.push("!!!".to_string());
        assert_eq!(
            args.validate(),
            Err("Entity #2 ('!!!') needs at least one letter or digit".to_string())
        );

        args.entities[1] = "3M".to_string();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_global_identity() {
        let mut args = make_args();
        args.identity = Some("*".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_numbers() {
        let mut args = make_args();
        args.concurrency = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.budget = Some(-1.0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
