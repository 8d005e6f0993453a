//! Conductor Campaign Reference Runtime: Demo CLI
//!
//! Runs one or all of the four campaign demo scenarios. Each scenario uses
//! real Conductor components (orchestrator, durable execution bridge, state
//! store, resource governor) wired together with mock campaign data.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- pipeline
//!   cargo run -p demo -- budget-abort
//!   cargo run -p demo -- flaky-workspace
//!   cargo run -p demo -- tenant-capacity
//!   cargo run -p demo -- --config conductor.toml run-all

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use conductor_contracts::error::ConductorResult;
use conductor_core::config::ConductorConfig;
use conductor_ref_campaign::runtime::default_config;
use conductor_ref_campaign::scenarios::{budget_abort, flaky_workspace, pipeline, tenant_capacity};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Conductor: checkpointed multi-agent orchestration demo.
///
/// Each subcommand runs one or all of the four campaign scenarios,
/// demonstrating stage checkpoints, command routing, bounded retry and
/// per-tenant admission control.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Conductor campaign reference runtime demo",
    long_about = "Runs Conductor campaign scenarios showing checkpointed stage transitions,\n\
                  agent command routing, retry with backoff, and tenant admission control."
)]
struct Cli {
    /// Runtime settings file (TOML). Defaults to the bundled scenario settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four campaign scenarios in sequence.
    RunAll,
    /// Scenario 1: Campaign Planning Pipeline (every stage, data request, cancel).
    Pipeline,
    /// Scenario 2: Invalid Budget Abort (handoff then abort at version 4).
    BudgetAbort,
    /// Scenario 3: Flaky Workspace API (retry with backoff, then exhaustion).
    FlakyWorkspace,
    /// Scenario 4: Tenant Capacity (concurrent sessions on a small budget).
    TenantCapacity,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging. Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match load_config(cli.config.as_ref()) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> ConductorResult<ConductorConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading runtime settings");
            ConductorConfig::from_file(path)
        }
        None => default_config(),
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run(command: Command, config: &ConductorConfig) -> ConductorResult<()> {
    match command {
        Command::RunAll => run_all(config).await,
        Command::Pipeline => pipeline::run_scenario(config).await,
        Command::BudgetAbort => budget_abort::run_scenario(config).await,
        Command::FlakyWorkspace => flaky_workspace::run_scenario(config).await,
        Command::TenantCapacity => tenant_capacity::run_scenario(config).await,
    }
}

async fn run_all(config: &ConductorConfig) -> ConductorResult<()> {
    pipeline::run_scenario(config).await?;
    budget_abort::run_scenario(config).await?;
    flaky_workspace::run_scenario(config).await?;
    tenant_capacity::run_scenario(config).await?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Conductor: Checkpointed Multi-Agent Orchestration");
    println!("Campaign Reference Demo");
    println!("=================================================");
    println!();
    println!("Conductor pipeline per step:");
    println!("  [1] Load the session and pick the agent (override, else stage default)");
    println!("  [2] Bridge acquires a tenant permit, weighted by operation kind");
    println!("  [3] Agent runs under a stage timeout; transient failures retry with backoff");
    println!("  [4] Orchestrator applies the reply: result, handoff, data request, control");
    println!("  [5] Versioned, checksummed checkpoint saved before the next agent runs");
    println!();
}
