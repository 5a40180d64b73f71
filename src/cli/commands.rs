//! CLI command definitions for impl-forge.
//!
//! `generate` runs every target of a manifest through the two-phase agent;
//! `check` validates a manifest and shows the context each target would get.

use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{ContextProvider, GeneratorConfig, PhaseRunner, TypeGraphContextProvider};
use crate::scheduler::{
    spawn_observer, ProgressCounters, ProgressMonitor, ProgressObserver, SchedulerStats,
    TargetScheduler,
};
use crate::targets::{GenerationResult, TargetManifest};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Default interval between progress log lines, in seconds.
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;

/// Implement annotated function stubs with a tool-calling LLM agent.
#[derive(Parser)]
#[command(name = "impl-forge")]
#[command(about = "Generate implementations for function stubs with a tool-calling LLM agent")]
#[command(version)]
#[command(
    long_about = "impl-forge reads a manifest of function stubs and asks an LLM to implement each one.\n\nEvery target goes through a research phase with read-only source tools, then an implementation phase whose result must pass validation.\n\nExample usage:\n  impl-forge generate --manifest targets.yaml --concurrency 8 --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate implementations for every target in a manifest.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Validate a manifest and print each target's resolved type context.
    Check(CheckArgs),
}

/// Arguments for `impl-forge generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Target manifest (YAML, or JSON by `.json` extension).
    #[arg(short = 'f', long)]
    pub manifest: PathBuf,

    /// Model identifier (overrides IMPL_FORGE_MODEL).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Chat-completions base URL (overrides IMPL_FORGE_API_BASE).
    #[arg(long)]
    pub api_base: Option<String>,

    /// API key for the provider endpoint.
    #[arg(long, env = "IMPL_FORGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Maximum number of targets generated at once.
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Maximum provider rounds per phase.
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Validation command; `{file}` is replaced with the candidate file path.
    #[arg(long)]
    pub validate_cmd: Option<String>,

    /// Seconds between progress log lines (0 disables).
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL_SECS)]
    pub progress_interval: u64,

    /// Print the JSON report to stdout instead of the summary.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Also write the JSON report to this file.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `impl-forge check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Target manifest (YAML, or JSON by `.json` extension).
    #[arg(short = 'f', long)]
    pub manifest: PathBuf,

    /// Type context depth (overrides IMPL_FORGE_CONTEXT_DEPTH).
    #[arg(long)]
    pub context_depth: Option<usize>,

    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// JSON report of a generation run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub stats: SchedulerStats,
    /// Results ordered by target index.
    pub results: Vec<GenerationResult>,
}

#[derive(Debug, Serialize)]
struct CheckEntry {
    index: usize,
    name: String,
    location: String,
    signature: String,
    context: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Check(args) => run_check_command(args).await,
    }
}

/// Environment config with CLI overrides applied, then validated.
fn build_config(args: &GenerateArgs) -> anyhow::Result<GeneratorConfig> {
    let mut config = GeneratorConfig::from_env()?;

    if let Some(ref model) = args.model {
        config = config.with_model(model.clone());
    }
    if let Some(ref api_base) = args.api_base {
        config = config.with_api_base(api_base.clone());
    }
    if let Some(ref api_key) = args.api_key {
        config = config.with_api_key(api_key.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_max_concurrency(concurrency);
    }
    if let Some(max_rounds) = args.max_rounds {
        config = config.with_max_rounds(max_rounds);
    }
    if let Some(ref command) = args.validate_cmd {
        config = config.with_validate_command(command.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let manifest = TargetManifest::load(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let config = build_config(&args)?;
    info!(
        manifest = %args.manifest.display(),
        targets = manifest.targets.len(),
        model = %config.model,
        max_concurrency = config.max_concurrency,
        "Loaded manifest"
    );

    let provider: Arc<dyn LlmProvider> = Arc::new(
        LiteLlmClient::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize LLM client: {}", e))?,
    );
    let context_provider: Arc<dyn ContextProvider> = Arc::new(TypeGraphContextProvider::new(
        manifest.types.clone(),
        config.context_depth,
    ));
    let runner = Arc::new(PhaseRunner::from_config(
        provider,
        &config,
        context_provider,
        manifest.source_root.clone(),
    ));

    let total = manifest.targets.len();
    let counters = ProgressCounters::new();
    let (events, observer_task) = spawn_observer(
        ProgressObserver::with_counters(counters.clone()),
        config.event_buffer,
    );
    let monitor = (args.progress_interval > 0).then(|| {
        ProgressMonitor::start(counters, total, Duration::from_secs(args.progress_interval))
    });

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let started_at = Utc::now();
    let start = Instant::now();
    let scheduler = TargetScheduler::new(runner, config.max_concurrency, events);
    let mut results = scheduler.execute(manifest.targets, cancel).await;
    let stats = scheduler.stats();

    interrupt.abort();
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    // Dropping the scheduler releases the last event sender.
    drop(scheduler);
    let observer = observer_task
        .finish()
        .await
        .map_err(|e| anyhow::anyhow!("Observer task failed: {}", e))?;

    results.sort_by_key(|r| r.index());
    let report = RunReport {
        run_id: Uuid::new_v4(),
        model: config.model.clone(),
        started_at,
        total_duration_ms: start.elapsed().as_millis() as u64,
        stats,
        results,
    };

    let json_output = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;

    if let Some(ref path) = args.output {
        tokio::fs::write(path, &json_output)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if args.json {
        println!("{}", json_output);
    } else {
        print_summary(&report, &observer);
    }

    Ok(())
}

fn print_summary(report: &RunReport, observer: &ProgressObserver) {
    for result in &report.results {
        let target = result.target();
        match (result.implementation(), result.failure()) {
            (Some(code), _) => {
                println!("\n✓ {} ({})", target.name, target.location);
                println!("{}", "-".repeat(50));
                println!("{}", code.trim_end());
            }
            (None, Some(reason)) => {
                println!("\n✗ {} ({})", target.name, target.location);
                println!("   {}", reason);
            }
            (None, None) => {}
        }
    }

    let failed_logs = observer.failed_logs();
    if failed_logs.iter().any(|(_, _, logs)| !logs.is_empty()) {
        println!("\nFailure logs:");
        for (index, name, logs) in failed_logs {
            for record in logs {
                println!("  [{}] {} {}: {}", index, name, record.level, record.message);
            }
        }
    }

    println!();
    println!("{}", "=".repeat(50));
    println!("Generation Summary");
    println!("{}", "=".repeat(50));
    println!("Run id: {}", report.run_id);
    println!("Model: {}", report.model);
    println!("Targets: {}", report.results.len());
    println!("Successful: {}", report.stats.completed);
    println!("Failed: {}", report.stats.failed);
    println!("Success rate: {:.1}%", report.stats.success_rate());
    println!(
        "Average duration: {}ms",
        report.stats.average_duration.as_millis()
    );
    println!("Total duration: {}ms", report.total_duration_ms);
}

async fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let manifest = TargetManifest::load(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let depth = match args.context_depth {
        Some(depth) => depth,
        None => GeneratorConfig::from_env()?.context_depth,
    };
    let provider = TypeGraphContextProvider::new(manifest.types.clone(), depth);

    let mut entries = Vec::with_capacity(manifest.targets.len());
    for (index, target) in manifest.targets.iter().enumerate() {
        let context = provider
            .context_for(&target.location, target)
            .await
            .with_context(|| format!("Failed to resolve context for {}", target.name))?;
        entries.push(CheckEntry {
            index,
            name: target.name.clone(),
            location: target.location.to_string(),
            signature: target.signature.clone(),
            context,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Manifest: {}", args.manifest.display());
    println!("Source root: {}", manifest.source_root.display());
    println!("Targets: {}", entries.len());
    for entry in &entries {
        println!("\n[{}] {} ({})", entry.index, entry.name, entry.location);
        println!("  {}", entry.signature);
        if entry.context.is_empty() {
            println!("  (no type context)");
        } else {
            for line in entry.context.lines() {
                println!("  | {}", line);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "impl-forge",
            "generate",
            "--manifest",
            "targets.yaml",
            "-c",
            "4",
            "--max-rounds",
            "12",
            "--validate-cmd",
            "rustfmt --check {file}",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.manifest, PathBuf::from("targets.yaml"));
                assert_eq!(args.concurrency, Some(4));
                assert_eq!(args.max_rounds, Some(12));
                assert_eq!(args.validate_cmd.as_deref(), Some("rustfmt --check {file}"));
                assert_eq!(args.progress_interval, DEFAULT_PROGRESS_INTERVAL_SECS);
                assert!(args.json);
            }
            _ => panic!("expected generate"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_check_with_global_log_level() {
        let cli = Cli::try_parse_from(["impl-forge", "check", "-f", "m.json", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Check(ref a) if a.manifest == PathBuf::from("m.json")));
    }

    #[test]
    fn test_overrides_applied() {
        let args = GenerateArgs {
            manifest: PathBuf::from("m.yaml"),
            model: Some("test/model".to_string()),
            api_base: Some("http://localhost:4000".to_string()),
            api_key: None,
            concurrency: Some(3),
            max_rounds: Some(5),
            validate_cmd: Some("true {file}".to_string()),
            progress_interval: 0,
            json: false,
            output: None,
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.model, "test/model");
        assert_eq!(config.api_base, "http://localhost:4000");
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.validate_command.as_deref(), Some("true {file}"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = GenerateArgs {
            manifest: PathBuf::from("m.yaml"),
            model: None,
            api_base: None,
            api_key: None,
            concurrency: Some(0),
            max_rounds: None,
            validate_cmd: None,
            progress_interval: 0,
            json: false,
            output: None,
        };
        assert!(build_config(&args).is_err());
    }
}
