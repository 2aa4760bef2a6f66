//! `zenus`: intent-driven shell CLI front-end. Exercises the
//! `forge-runtime` execution core; not part of the core itself (§10).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forge_runtime::{ExecutionMode, Orchestrator};
use tracing_subscriber::EnvFilter;

mod audit_sink;
mod config;
mod interact;
mod tools;
mod translator;

use audit_sink::VerboseAuditSink;
use config::ZenusConfig;
use interact::CliInteract;
use tools::ReferenceToolRegistry;
use translator::ReferenceTranslator;

#[derive(Parser)]
#[command(name = "zenus")]
#[command(version, about = "Intent-driven shell: validated action plans, concurrent and recoverable")]
struct Cli {
    #[arg(long, global = true)]
    state_root: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single direct-or-iterative intent (autodetected).
    Run {
        input: String,
        #[arg(long)]
        iterative: bool,
    },
    /// Force iterative (GoalLoop) execution of a goal.
    Goal {
        input: String,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Roll back the last N reversible actions.
    Rollback {
        n: usize,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recorded actions, optionally filtered by tool.
    Log {
        #[arg(long)]
        tool: Option<String>,
    },
    /// Report cache/circuit/state-root health.
    Health,
    /// Scaffold the state root directory layout.
    Init,
}

/// Exit codes per §6.
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC_FAILURE: i32 = 1;
    pub const SCHEMA: i32 = 2;
    #[allow(dead_code)]
    pub const CANCELLATION: i32 = 3;
    pub const ROLLBACK_NOT_FEASIBLE: i32 = 4;
    #[allow(dead_code)]
    pub const CIRCUIT_OR_BUDGET_EXHAUSTED: i32 = 5;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.verbose { "zenus=debug,forge_runtime=debug" } else { "zenus=info,forge_runtime=info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let _ = dotenvy::dotenv();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code::GENERIC_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init => {
            let config = ZenusConfig::load(cli.state_root)?;
            println!("initialized zenus state root at {}", config.state_root().display());
            Ok(exit_code::SUCCESS)
        }
        Commands::Run { input, iterative } => {
            let orchestrator = open_session(cli.state_root, cli.verbose, cli.yes)?;
            let mode = if iterative { Some(ExecutionMode::Iterative) } else { None };
            let result = orchestrator.execute(&input, "", mode).await?;
            print_observations(&result.observations);
            if let Some(outcome) = result.goal_outcome {
                println!("goal outcome: {outcome:?}");
            }
            let schema_failure = result
                .observations
                .iter()
                .any(|o| matches!(o.error_kind, Some(forge_common::CoreError::Schema { .. })));
            Ok(if schema_failure { exit_code::SCHEMA } else { exit_code::SUCCESS })
        }
        Commands::Goal { input, max_iterations } => {
            let orchestrator = open_session(cli.state_root, cli.verbose, cli.yes)?;
            let result = orchestrator.execute_iterative(&input, max_iterations).await?;
            print_observations(&result.observations);
            println!("goal outcome: {:?}", result.goal_outcome);
            Ok(exit_code::SUCCESS)
        }
        Commands::Rollback { n, dry_run } => {
            let orchestrator = open_session(cli.state_root, cli.verbose, cli.yes)?;
            if dry_run {
                let preview = orchestrator.rollback_preview(n)?;
                if preview.is_empty() {
                    println!("nothing to roll back");
                    return Ok(exit_code::ROLLBACK_NOT_FEASIBLE);
                }
                for (record, step) in preview {
                    match step {
                        Some(s) => println!(
                            "would invert record #{} ({} {}) via {} {}",
                            record.id, record.tool, record.action, s.tool, s.action
                        ),
                        None => println!("record #{} ({} {}) has no inverse", record.id, record.tool, record.action),
                    }
                }
                Ok(exit_code::SUCCESS)
            } else {
                let summary = orchestrator.rollback(n).await?;
                for outcome in &summary.outcomes {
                    println!(
                        "record #{} ({} {}): {}",
                        outcome.record_id,
                        outcome.tool,
                        outcome.action,
                        if outcome.inverted { "reverted" } else { &outcome.detail }
                    );
                }
                Ok(if summary.all_inverted() { exit_code::SUCCESS } else { exit_code::ROLLBACK_NOT_FEASIBLE })
            }
        }
        Commands::Log { tool } => {
            let orchestrator = open_session(cli.state_root, cli.verbose, cli.yes)?;
            for record in orchestrator.history(tool.as_deref())? {
                println!(
                    "#{} [{}] {} {} -> {}{}",
                    record.id,
                    record.timestamp,
                    record.tool,
                    record.action,
                    record.result,
                    if record.rolled_back { " (rolled back)" } else { "" }
                );
            }
            Ok(exit_code::SUCCESS)
        }
        Commands::Health => {
            let orchestrator = open_session(cli.state_root, cli.verbose, cli.yes)?;
            let report = orchestrator.health();
            println!("state root: {}", report.state_root.display());
            println!("cache entries: {}", report.cache_entries);
            println!(
                "open circuits: {}",
                if report.open_circuits.is_empty() { "none".to_string() } else { report.open_circuits.join(", ") }
            );
            if report.budgets.is_empty() {
                println!("retry budgets: none consumed yet");
            } else {
                println!("retry budgets:");
                for budget in &report.budgets {
                    println!("  {}: {}/{}", budget.op_class, budget.used, budget.total);
                }
            }
            Ok(exit_code::SUCCESS)
        }
    }
}

fn open_session(state_root: Option<PathBuf>, verbose: bool, yes: bool) -> Result<Orchestrator> {
    let config = ZenusConfig::load(state_root)?;
    let translator = Arc::new(ReferenceTranslator);
    let registry = Arc::new(ReferenceToolRegistry);
    let interact = Arc::new(CliInteract { auto_yes: yes });
    let sink: Box<dyn forge_common::AuditSink> =
        if verbose { Box::new(VerboseAuditSink) } else { Box::new(forge_common::NullAuditSink) };
    Ok(Orchestrator::open_session(&config, translator, registry, sink, interact)?)
}

fn print_observations(observations: &[forge_common::Observation]) {
    for obs in observations {
        println!(
            "step[{}] {:?} ({}ms) {}",
            obs.step_ref,
            obs.outcome,
            obs.elapsed_ms,
            obs.error_kind.as_ref().map(|e| e.to_string()).unwrap_or_else(|| obs.truncated_stdout.clone())
        );
    }
}
