use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use fog_view_scanner::config::ScanConfig;
use fog_view_scanner::scanning::runtime::ScanCoordinator;
use fog_view_scanner::scanning::view::sim::{SimAccount, SimViewService};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON scan config. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan an in-memory view service end to end.
    Simulate(SimulateArgs),
}

#[derive(clap::Args)]
struct SimulateArgs {
    #[arg(long, default_value_t = 3)]
    epochs: i64,

    #[arg(long, default_value_t = 40)]
    outputs_per_epoch: u64,

    #[arg(long, default_value_t = 1_000)]
    blocks: u64,

    /// Decommission the first epoch once the ledger is built.
    #[arg(long)]
    decommission_first: bool,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };

    match args.command {
        Command::Simulate(sim) => run_simulation(&sim, config).await,
    }
}

async fn run_simulation(args: &SimulateArgs, config: ScanConfig) -> Result<()> {
    if args.epochs <= 0 {
        bail!("--epochs must be positive");
    }
    let epochs = args.epochs as u64;
    if args.blocks < epochs {
        bail!("--blocks must be at least --epochs");
    }

    println!("[SIMULATE] Building ledger: {} epochs over {} blocks", epochs, args.blocks);

    let account = SimAccount::from_seed(args.seed);
    let service = Arc::new(SimViewService::new());
    let blocks_per_epoch = args.blocks / epochs;

    let mut expected_value = 0u64;
    for epoch in 0..epochs {
        let epoch_id = epoch as i64 + 1;
        let start = epoch * blocks_per_epoch;
        service.add_epoch(epoch_id, start);

        for k in 0..args.outputs_per_epoch {
            let block = start + (k * blocks_per_epoch) / args.outputs_per_epoch.max(1);
            let value = 1_000 + k;
            service
                .add_owned_output(&account, epoch_id, block, value)
                .with_context(|| format!("adding output {} to epoch {}", k, epoch_id))?;
            expected_value += value;
        }
    }
    service.advance_blocks(args.blocks);
    if args.decommission_first {
        service.decommission(1);
    }

    let coordinator = ScanCoordinator::new(Arc::clone(&service), account, config);
    {
        let checker = coordinator.sync_checker();
        let mut checker = checker
            .write()
            .map_err(|_| anyhow::anyhow!("sync checker lock poisoned"))?;
        checker.set_ledger_block_count(args.blocks);
        checker.set_consensus_block_count(args.blocks);
    }

    println!("[SIMULATE] Starting scan...");
    let t0 = Instant::now();
    let mut found = 0usize;
    let mut total_value = 0u64;
    let summary = coordinator
        .start_scan(|outputs| {
            found += outputs.len();
            total_value += outputs.iter().map(|o| o.value).sum::<u64>();
            log::info!("[SIMULATE] +{} outputs ({} so far)", outputs.len(), found);
        })
        .await?;
    let total_time = t0.elapsed();

    let status = coordinator.status()?;
    let sync = coordinator
        .sync_checker()
        .read()
        .map_err(|_| anyhow::anyhow!("sync checker lock poisoned"))?
        .in_sync();

    println!("[SIMULATE] Scan Finished");
    println!("-----------------------------------");
    println!("Total Time:       {:?}", total_time);
    println!("Total Rounds:     {}", summary.rounds);
    println!("Requests:         {}", service.requests().len());
    println!("Outputs Found:    {} / {}", found, epochs * args.outputs_per_epoch);
    println!("Total Value:      {}", total_value);
    println!("Known Safe Block: {}", summary.known_safe_block_count);
    println!("Active Epochs:    {} / {}", status.active_epoch_count, status.epoch_count);
    println!(
        "Sync Status:      {}",
        sync.as_ref().map(|_| "in sync".to_string()).unwrap_or_else(|e| e.to_string())
    );
    println!("-----------------------------------");

    if total_value != expected_value {
        bail!(
            "scan found value {} but the ledger holds {}",
            total_value,
            expected_value
        );
    }
    Ok(())
}
