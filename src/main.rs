mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Value, json};

use batchrun::batch::BatchManager;
use batchrun::config::EngineConfig;
use batchrun::lifecycle::{JobSpec, Params};
use batchrun::logging;
use batchrun::pool::{Payload, WorkerPool, from_fn};
use batchrun::store::{StatusStore, select_lock};
use batchrun::ui::BatchProgress;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    config.validate()?;

    let lock = select_lock(config.file_locks, &config.status_dir.join("jobs"));
    let store = Arc::new(
        StatusStore::open(&config.status_dir, config.retention(), lock)
            .with_context(|| format!("failed to open {}", config.status_dir.display()))?,
    );

    if let Command::Sweep { max_age_hours } = cli.command {
        let max_age = max_age_hours
            .map(|hours| Duration::from_secs(hours.saturating_mul(60 * 60)))
            .unwrap_or_else(|| config.retention());
        let report = store.sweep(max_age);
        println!(
            "Removed {} job records, {} batches, {} temp files",
            report.records.len(),
            report.batches.len(),
            report.scratch_files
        );
        return Ok(());
    }

    let pool = Arc::new(WorkerPool::start(Arc::clone(&store), config.pool_config()));
    let manager = BatchManager::open(store, Arc::clone(&pool), config.failure_policy);

    let outcome = match cli.command {
        Command::Demo {
            jobs,
            fail,
            sleep_ms,
            poll_ms,
        } => {
            let poll = poll_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.poll_interval());
            run_demo(&manager, jobs, fail, sleep_ms, poll).await
        }
        Command::Status { batch_id } => manager
            .get_batch_status(&batch_id)
            .map_err(anyhow::Error::from)
            .and_then(|batch| Ok(serde_json::to_string_pretty(&batch)?))
            .map(|json| println!("{json}")),
        Command::List => {
            for summary in manager.list_batches() {
                println!(
                    "{}  {:<24} jobs={:<4} {}{}",
                    summary.id,
                    summary.name,
                    summary.job_count,
                    summary.created_at.format("%Y-%m-%d %H:%M:%S"),
                    if summary.cancelled { "  (cancelled)" } else { "" }
                );
            }
            Ok(())
        }
        Command::Delete { batch_id } => manager
            .delete_batch(&batch_id)
            .map(|()| println!("Deleted batch {batch_id}"))
            .map_err(anyhow::Error::from),
        Command::Sweep { .. } => Ok(()),
    };

    pool.shutdown().await;
    outcome
}

/// Create a batch with a sleeping payload and poll it until it is terminal.
/// Ctrl-C cancels whatever has not started yet.
async fn run_demo(
    manager: &BatchManager,
    jobs: usize,
    fail: usize,
    sleep_ms: u64,
    poll: Duration,
) -> Result<()> {
    let specs: Vec<JobSpec> = (0..jobs)
        .map(|index| {
            let mut params = Params::new();
            params.insert("index".into(), json!(index));
            params.insert("sleep_ms".into(), json!(sleep_ms));
            params.insert("fail".into(), json!(index < fail));
            JobSpec::new(format!("demo-{index}"), params)
        })
        .collect();

    let batch_id = manager.create_batch(specs, "demo")?;
    println!("Batch {batch_id}");
    manager.start_batch(&batch_id, demo_payload())?;

    let progress = BatchProgress::start("demo", jobs);
    let mut interrupted = false;
    loop {
        let batch = manager.get_batch_status(&batch_id)?;
        progress.update(&batch);
        if batch.status.is_terminal() {
            progress.finish(&batch);
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for ctrl-c")?;
                interrupted = true;
                let cancelled = manager.cancel_batch(&batch_id)?;
                tracing::info!(%batch_id, cancelled, "interrupted, waiting for running jobs");
            }
        }
    }
}

fn demo_payload() -> Arc<dyn Payload> {
    from_fn(|params| {
        let index = params.get("index").and_then(Value::as_u64).unwrap_or_default();
        let sleep_ms = params.get("sleep_ms").and_then(Value::as_u64).unwrap_or_default();
        std::thread::sleep(Duration::from_millis(sleep_ms));
        if params.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            bail!("demo job {index} was asked to fail");
        }
        Ok(json!({ "index": index, "slept_ms": sleep_ms }))
    })
}
