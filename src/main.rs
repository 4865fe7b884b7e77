//! Weft CLI - deferred-value dependency graph engine

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use weft::error::{FixSuggestion, ProvisionError, WeftError};
use weft::{Engine, EngineConfig, Manifest, MockProvisioner, NodeStatus, Plan, RunReport};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft - deferred-value dependency graph engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a manifest (parse, resolve references, check the graph)
    Validate {
        /// Path to a stack manifest (.yaml)
        file: PathBuf,
    },

    /// Run a manifest against the in-memory mock provisioner
    Simulate {
        /// Path to a stack manifest (.yaml)
        file: PathBuf,

        /// Make the resource with this logical name fail (repeatable)
        #[arg(long = "fail", value_name = "NAME")]
        fail: Vec<String>,

        /// Cap on collaborator calls in flight (0 = unbounded)
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Show secret exports in clear text
        #[arg(long)]
        reveal: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Print the event log as JSON after the report
        #[arg(long)]
        events: bool,

        /// Config file (defaults to ~/.config/weft/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--json` stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("weft=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => validate_manifest(&file),
        Commands::Simulate {
            file,
            fail,
            max_concurrency,
            reveal,
            json,
            events,
            config,
        } => {
            let options = SimulateOptions {
                fail,
                max_concurrency,
                reveal,
                json,
                events,
                config,
            };
            simulate_manifest(&file, options).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.downcast_ref::<WeftError>().and_then(|w| w.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

struct SimulateOptions {
    fail: Vec<String>,
    max_concurrency: Option<usize>,
    reveal: bool,
    json: bool,
    events: bool,
    config: Option<PathBuf>,
}

fn load_plan(file: &Path) -> anyhow::Result<Plan> {
    let manifest =
        Manifest::load(file).with_context(|| format!("loading {}", file.display()))?;
    let plan = manifest.to_stack()?.build()?;
    Ok(plan)
}

fn validate_manifest(file: &Path) -> anyhow::Result<()> {
    let plan = load_plan(file)?;

    println!(
        "{} Stack '{}' is valid ({})",
        "✓".green(),
        plan.stack().bold(),
        file.display()
    );
    println!("  Resources: {}", plan.len());
    println!("  Lookups: {}", plan.lookup_count());
    println!("  Order:");
    for (i, id) in plan.topological_order().iter().enumerate() {
        let tag = if plan.is_component(id) { " (component)".dimmed().to_string() } else { String::new() };
        println!("    {:>3}. {}{}", i + 1, id, tag);
    }
    if !plan.exports().is_empty() {
        let names: Vec<&str> = plan.exports().names().collect();
        println!("  Exports: {}", names.join(", "));
    }

    Ok(())
}

async fn simulate_manifest(file: &Path, options: SimulateOptions) -> anyhow::Result<()> {
    let plan = load_plan(file)?;

    let mut config = match &options.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    }
    .with_env()?;
    if let Some(limit) = options.max_concurrency {
        config = config.with_max_concurrency(limit);
    }
    if options.reveal {
        config = config.with_reveal_secrets(true);
    }

    let mut mock = MockProvisioner::new();
    for name in &options.fail {
        // Components are never handed to the provisioner, so failing one is a no-op
        let provisioned = plan
            .topological_order()
            .iter()
            .any(|id| id.name() == name.as_str() && !plan.is_component(id));
        if !provisioned {
            anyhow::bail!(
                "--fail '{}' matches no provisioned resource in stack '{}'",
                name,
                plan.stack()
            );
        }
        mock = mock.with_failure(name.clone(), ProvisionError::unavailable("injected failure"));
    }
    let mock = Arc::new(mock);

    if !options.json {
        println!(
            "{} Simulating stack '{}' ({} resources, {} lookups)",
            "→".cyan(),
            plan.stack().cyan().bold(),
            plan.len(),
            plan.lookup_count()
        );
    }

    // Ctrl-C cancels everything not yet dispatched
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let engine = Engine::new(mock.clone())
        .with_lookup(mock)
        .with_config(config);
    let report = engine.run_with_cancellation(plan, cancel).await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if options.events {
        println!("{}", serde_json::to_string_pretty(&report.events.to_json())?);
    }

    report.ensure_success()?;
    Ok(())
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        let marker = match outcome.status {
            NodeStatus::Succeeded => "✓".green(),
            NodeStatus::Failed => "✗".red(),
            NodeStatus::Skipped => "⊘".yellow(),
            NodeStatus::Cancelled => "⊗".yellow(),
            NodeStatus::Pending | NodeStatus::Running => "?".dimmed(),
        };
        println!("  {} {} {}", marker, outcome.resource, outcome.status.to_string().dimmed());
    }

    let chains = report.causal_chains();
    if !chains.is_empty() {
        println!("{}", "Failures:".red().bold());
        for chain in chains {
            println!("  {} {}", "✗".red(), chain.root);
            for skipped in chain.skipped {
                println!("    └─ skipped {}", skipped);
            }
        }
    }

    if !report.exports.is_empty() {
        println!("{}", "Exports:".cyan().bold());
        for entry in report.exports.entries() {
            let value = if entry.value.is_error() {
                entry.value.to_string().red().to_string()
            } else {
                entry.value.to_string()
            };
            println!("  {} = {}", entry.name.bold(), value);
        }
    }

    let succeeded = report.count(NodeStatus::Succeeded);
    println!(
        "{} {}/{} succeeded in {}ms",
        if report.is_success() { "✓".green() } else { "✗".red() },
        succeeded,
        report.outcomes.len(),
        report.duration.as_millis()
    );
}
