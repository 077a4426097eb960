//! RivalScope - multi-provider business intelligence with trust scoring
//!
//! A CLI tool that asks several AI providers about business entities,
//! scores every claimed fact for trust, merges the answers into one
//! record per entity and writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success (at least one entity completed)
//!   1 - Runtime error (config, store, report writing, etc.)
//!   2 - Run finished but no entity completed

mod analysis;
mod cli;
mod config;
mod error;
mod generator;
mod governance;
mod models;
mod report;
mod store;
mod trust;

use analysis::{AnalysisEngine, EngineSettings, ProgressReporter, ProgressUpdate};
use anyhow::{bail, Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, ProviderConfig, CONFIG_FILE};
use governance::{Budgets, CostGovernor, InMemoryRateLimiter, RateLimitPolicy, TieredRateLimiter};
use indicatif::{ProgressBar, ProgressStyle};
use models::{entity_id_for, Report};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{JsonFileStore, Store};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("RivalScope v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .rivalscope.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set providers, budgets, rate limits and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let providers = config.select_providers(args.providers.as_deref())?;
    if providers.is_empty() {
        bail!("No providers configured. Add [[providers]] to {} or pass --config", CONFIG_FILE);
    }

    let identity = config.general.identity.clone();
    let store_path = PathBuf::from(&config.store.path);
    let file_store = JsonFileStore::open(&store_path)
        .await
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;
    info!("Store: {}", file_store.path().display());
    let store: Arc<dyn Store> = Arc::new(file_store);

    let engine = AnalysisEngine::new(
        Arc::clone(&store),
        TieredRateLimiter::new(
            Arc::new(InMemoryRateLimiter::new()),
            RateLimitPolicy::from(&config.rate_limit),
        ),
        CostGovernor::new(Arc::clone(&store), Budgets::from(&config.budget)),
        config.scoring.clone(),
        EngineSettings::from(&config),
    );

    if args.dry_run {
        return handle_dry_run(&engine, &identity, &providers, &args.entities).await;
    }

    let generators = generator::build_generators(&providers, &config.generator)?;

    println!("🔎 Analyzing {} entities as '{}'", args.entities.len(), identity);
    println!(
        "   Providers: {}",
        providers.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "   Timeout: {}s per call | Concurrency: {}\n",
        config.generator.timeout_seconds, config.general.concurrency
    );

    let (reporter, bar_task) = if args.quiet {
        (ProgressReporter::disabled(), None)
    } else {
        let (reporter, rx) = ProgressReporter::channel(analysis::PROGRESS_CHANNEL_CAPACITY);
        (reporter, Some(spawn_progress_bar(rx, args.entities.len())))
    };

    let run = engine
        .run_analysis(&identity, &args.entities, &generators, &reporter)
        .await;
    drop(reporter);
    if let Some(task) = bar_task {
        if let Err(e) = task.await {
            debug!("Progress bar task ended abnormally: {}", e);
        }
    }

    for warning in &run.warnings {
        warn!("{}", warning);
    }

    let report = Report::from_run(run, providers.iter().map(|p| p.id.clone()).collect());

    let output_path = output_path(&args, &config);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    let summary = &report.summary;
    println!("\n📊 Analysis Summary:");
    println!(
        "   Entities: {} | ✅ Completed: {} | ❌ Failed: {}",
        summary.entities, summary.completed, summary.failed
    );
    println!(
        "   Facts - 🟢 High: {} | 🟡 Medium: {} | 🔴 Low: {}",
        summary.high_trust_facts, summary.medium_trust_facts, summary.low_trust_facts
    );
    println!("   Cost: ${:.4}", report.metadata.total_cost_usd);
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!("\n✅ Report saved to: {}", output_path.display());

    if !report.success {
        eprintln!(
            "\n⛔ {}. Failing (exit code 2).",
            report.error.as_deref().unwrap_or("No entity completed")
        );
        return Ok(2);
    }

    Ok(0)
}

/// Render progress updates until the engine drops its sender.
fn spawn_progress_bar(mut rx: mpsc::Receiver<ProgressUpdate>, total: usize) -> JoinHandle<()> {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            bar.set_position(update.completed as u64);
            if let Some(entity) = update.current_entity {
                bar.set_message(entity);
            }
        }
        bar.finish_and_clear();
    })
}

/// Handle --dry-run: show what a run would do without calling providers.
async fn handle_dry_run(
    engine: &AnalysisEngine,
    identity: &str,
    providers: &[ProviderConfig],
    entities: &[String],
) -> Result<i32> {
    println!("\n🔍 Dry run (no provider calls)...\n");

    println!("   Providers:");
    for provider in providers {
        println!(
            "     • {} ({:?}, model {}) ${:.4}/call, reliability {:.2}",
            provider.id, provider.kind, provider.model, provider.cost_per_call_usd, provider.reliability
        );
    }

    let per_entity: f64 = providers.iter().map(|p| p.cost_per_call_usd).sum();
    let projected = per_entity * entities.len() as f64;
    let check = engine.governor().check_allowed(identity, projected).await?;

    println!("\n   Entities:");
    for name in entities {
        let entity_id = entity_id_for(name);
        let spent = engine.governor().entity_cost(&entity_id).await?;
        println!("     • {} ({}) spent to date ${:.4}", name, entity_id, spent);
    }

    let policy = engine.limiter().policy();
    let settings = engine.settings();
    println!("\n   Budget for '{}':", identity);
    println!(
        "     Spent this month: ${:.4} of ${:.2}",
        check.current_spend, check.limit
    );
    println!(
        "     Projected: ${:.4} -> {}",
        projected,
        if check.allowed { "within budget" } else { "would exceed budget" }
    );
    println!(
        "\n   Rate limit: {} global / {} per identity every {}ms",
        policy.global_max_requests, policy.identity_max_requests, policy.window_ms
    );
    println!(
        "   Timeout: {:?} per call | Concurrency: {}",
        settings.call_timeout, settings.concurrency
    );

    println!("\n✅ Dry run complete. No providers were called.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

/// Report path: --output, else the configured one with the format's extension.
fn output_path(args: &Args, config: &Config) -> PathBuf {
    if let Some(ref output) = args.output {
        return output.clone();
    }

    let configured = PathBuf::from(&config.general.output);
    match args.format {
        OutputFormat::Json => configured.with_extension("json"),
        OutputFormat::Markdown => configured,
    }
}
