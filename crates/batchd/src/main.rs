//! batchd: the batchgrid daemon.
//!
//! Wires the state loop and the scheduler loop together:
//! - Target state store (JSON snapshot) + state updater
//! - Batch scheduler over the inventory file
//! - Process-backed stage dispatch
//!
//! # Usage
//!
//! ```text
//! batchd run --config batchgrid.toml --continuous
//! batchd run --config batchgrid.toml          # one cycle, then exit
//! batchd print-config                         # default configuration
//! ```

mod dispatch;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use batch_core::{BatchConfig, epoch_millis};
use batchgrid_scheduler::{BatchScheduler, FileInventory};
use batchgrid_state::{Reducer, StateUpdater, TargetStateStore, port};

use crate::dispatch::{ProcessDispatcher, Workers};

#[derive(Parser)]
#[command(name = "batchd", about = "batchgrid batch scheduling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler.
    Run {
        /// Path to batchgrid.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Keep scheduling until Ctrl-C instead of running a single cycle.
        #[arg(long)]
        continuous: bool,
    },
    /// Print the default configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,batchd=debug,batchgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, continuous } => {
            let config = match config {
                Some(path) => BatchConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => BatchConfig::default(),
            };
            run(config, continuous).await
        }
        Command::PrintConfig => {
            print!("{}", BatchConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: BatchConfig, continuous: bool) -> anyhow::Result<()> {
    info!(continuous, "batchd starting");

    // ── State loop ────────────────────────────────────────────

    let (port_tx, port_rx) = port(config.state.port_capacity);
    let store = TargetStateStore::load(&config.state.path);
    info!(path = ?config.state.path, targets = store.len(), "target state store opened");
    let mut updater = StateUpdater::new(store, port_rx, Reducer::new(config.timing.stagger_ms));

    // ── Scheduler ─────────────────────────────────────────────

    let inventory = FileInventory::new(&config.inventory.path);
    let dispatcher = ProcessDispatcher::new(&config.worker, port_tx.clone());
    let workers = dispatcher.workers();
    let mut scheduler =
        BatchScheduler::new(&config, Box::new(inventory), Box::new(dispatcher), port_tx);

    if !continuous {
        let poll = Duration::from_millis(config.state.poll_interval_ms);
        updater.tick(epoch_millis())?;
        let report = scheduler.run_cycle(updater.store(), epoch_millis())?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        drain_workers(&mut updater, &workers, poll).await?;
        return Ok(());
    }

    // ── Background loops ──────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater_shutdown = shutdown_rx.clone();
    let scheduler_shutdown = shutdown_rx;
    let poll = Duration::from_millis(config.state.poll_interval_ms);
    let states_path = config.state.path.clone();

    let updater_handle = tokio::spawn(async move {
        updater.run(poll, updater_shutdown).await;
    });
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(states_path, scheduler_shutdown).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    let _ = updater_handle.await;

    info!("batchd stopped");
    Ok(())
}

/// Keep the state loop ticking until every launched worker has reported,
/// then persist the final state.
async fn drain_workers(
    updater: &mut StateUpdater,
    workers: &Workers,
    poll: Duration,
) -> anyhow::Result<()> {
    let in_flight = workers.in_flight();
    if in_flight > 0 {
        info!(workers = in_flight, "waiting for launched workers to report");
    }
    let wait = workers.wait_all();
    tokio::pin!(wait);
    loop {
        tokio::select! {
            _ = &mut wait => break,
            _ = tokio::time::sleep(poll) => {
                updater.tick(epoch_millis())?;
            }
        }
    }
    updater.tick(epoch_millis())?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use batch_core::config::WorkerConfig;
    use batch_core::{Lifecycle, StageKind};

    const INVENTORY: &str = r#"{
        "nodes": [{ "name": "home", "maxCapacity": 64, "usedCapacity": 0 }],
        "targets": [{
            "name": "n00dles",
            "maxAmount": 70000,
            "currentAmount": 70000,
            "minDefense": 1,
            "currentDefense": 1,
            "extractDuration": 4000,
            "replenishDuration": 6000,
            "counterDuration": 8000,
            "extractFractionPerThread": 0.05,
            "replenishGrowthPerThread": 1.06,
            "counterDefensePerThread": 0.05
        }]
    }"#;

    fn config(dir: &std::path::Path) -> BatchConfig {
        let mut config = BatchConfig::default();
        config.state.path = dir.join("target-states.json");
        config.inventory.path = dir.join("inventory.json");
        config.worker = WorkerConfig {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo '{\"amount\": 35000.0, \"duration\": 4000}'".to_string(),
                "worker".to_string(),
            ],
        };
        config
    }

    #[tokio::test]
    async fn single_shot_run_persists_worker_reports() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.inventory.path, INVENTORY).unwrap();

        // First sight: only the init handshake is persisted.
        run(config.clone(), false).await.unwrap();
        let store = TargetStateStore::load(&config.state.path);
        assert_eq!(store.get("n00dles").unwrap().lifecycle, Lifecycle::Uninitialized);

        // Second run: the extract is launched and its report lands before exit.
        run(config.clone(), false).await.unwrap();
        let store = TargetStateStore::load(&config.state.path);
        let state = store.get("n00dles").unwrap();
        assert_eq!(state.lifecycle, Lifecycle::Stabilizing);
        assert_eq!(state.running_jobs, 0);
        assert_eq!(state.progress, Some(StageKind::Extract));
        assert_eq!(state.stages.extract.threads, 10);
        assert_eq!(state.stages.extract.duration, 4000);

        // A third run is not left waiting on the earlier job.
        run(config.clone(), false).await.unwrap();
        let store = TargetStateStore::load(&config.state.path);
        assert_eq!(store.get("n00dles").unwrap().running_jobs, 0);
    }
}
