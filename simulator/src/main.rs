//! CapVault Simulator
//!
//! Drives a vault ledger with simulated wallets, either through a random
//! workload or a scripted scenario, then checks that no value was lost.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capvault_ledger::VaultConfig;

mod controller;
mod metrics;
mod scenario;
mod wallet;

use controller::SimulationController;
use scenario::Scenario;

/// CapVault Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "CapVault ledger simulation environment")]
struct Args {
    /// Number of simulated wallets to create
    #[arg(short, long, default_value = "3")]
    accounts: usize,

    /// Bank cap in base units (overrides VAULT_BANK_CAP)
    #[arg(long, allow_negative_numbers = true)]
    bank_cap: Option<i128>,

    /// Per-withdrawal limit in base units (overrides VAULT_WITHDRAW_LIMIT)
    #[arg(long, allow_negative_numbers = true)]
    withdraw_limit: Option<i128>,

    /// Probability that an outbound transfer fails
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Scenario to run: a built-in name or a path to a .json file
    #[arg(short, long)]
    scenario: Option<String>,

    /// Operations per wallet in random mode
    #[arg(long, default_value = "100")]
    ops: u64,

    /// Run duration in seconds (0 = until ops are done)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Write a ledger snapshot to this path when done
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve the ledger config from the environment and CLI overrides.
fn resolve_config(args: &Args) -> anyhow::Result<VaultConfig> {
    let mut config = VaultConfig::from_env()?;

    match (args.bank_cap, args.withdraw_limit) {
        (None, None) => {}
        (bank_cap, withdraw_limit) => {
            let bank_cap = bank_cap.unwrap_or(config.bank_cap.units() as i128);
            let withdraw_limit = withdraw_limit.unwrap_or(config.withdraw_limit.units() as i128);
            let event_buffer = config.event_buffer;
            config = VaultConfig::from_signed(bank_cap, withdraw_limit)?;
            config.event_buffer = event_buffer;
        }
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!("Starting CapVault Simulator");

    let controller = if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        let mut config = VaultConfig::new(scenario.bank_cap, scenario.withdraw_limit);
        config.event_buffer = resolve_config(&args)?.event_buffer;

        let controller =
            SimulationController::new(config, args.accounts.max(3), args.failure_rate, args.seed)?;
        controller.run_scenario(&scenario).await?;
        info!(scenario = %scenario.name, "Scenario passed");
        controller
    } else {
        let config = resolve_config(&args)?;
        info!(
            bank_cap = %config.bank_cap,
            withdraw_limit = %config.withdraw_limit,
            accounts = args.accounts,
            "Running random workload"
        );

        let duration = if args.duration > 0 {
            Some(std::time::Duration::from_secs(args.duration))
        } else {
            None
        };

        let controller =
            SimulationController::new(config, args.accounts, args.failure_rate, args.seed)?;
        controller.run(args.ops, duration).await?;
        controller
    };

    controller.verify().await?;

    let ledger = controller.ledger();
    let stats = ledger.stats();
    let metrics = controller.get_metrics().await;

    info!("Simulation complete");
    info!(
        total_deposited = %stats.total_deposited,
        total_withdrawn = %stats.total_withdrawn,
        remaining_capacity = %stats.remaining_capacity(),
        deposits = stats.deposit_count,
        withdrawals = stats.withdraw_count,
        accounts = ledger.account_count(),
        "Ledger totals"
    );
    info!(
        total = metrics.total_operations(),
        successful = metrics.successful_operations(),
        success_rate = metrics.success_rate(),
        p50_latency_us = metrics.latency_percentile_us(50.0).unwrap_or(0),
        p99_latency_us = metrics.latency_percentile_us(99.0).unwrap_or(0),
        "Operations"
    );
    for (kind, tally) in metrics.tallies() {
        info!(
            operation = kind.label(),
            attempted = tally.attempted(),
            succeeded = tally.succeeded,
            failed = tally.failed_total(),
            "Operation tally"
        );
    }
    for (code, count) in metrics.failures_by_code() {
        info!(code, count, "Failures");
    }
    info!("Ledger metrics:\n{}", ledger.shared_metrics().to_prometheus());

    if let Some(path) = &args.snapshot {
        std::fs::write(path, ledger.snapshot().to_json()?)?;
        info!(path = %path.display(), "Snapshot written");
    }

    Ok(())
}
