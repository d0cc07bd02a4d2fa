//! rakeback-worker: single-process cashback host
//!
//! Runs the cashback engine with its background tasks:
//! - rate window scheduler
//! - earning expiry and retry sweeps
//! - wager feed, reading newline-delimited JSON wager events from stdin
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   path: rakeback.db
//! retry:
//!   max_retries: 3
//!   initial_delay_ms: 1000
//! schedule:
//!   interval_secs: 60
//! ```

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use rakeback::config::Config;
use rakeback::engine::maintenance::{spawn_expiry_task, spawn_retry_sweep_task};
use rakeback::engine::CashbackEngine;
use rakeback::ingest::{feed_channel, spawn_wager_feed};
use rakeback::ledger::InMemoryLedger;
use rakeback::notify::BroadcastNotifier;
use rakeback::scheduler::ScheduleManager;
use rakeback::storage::init_storage;
use rakeback::utils::bootstrap::{init_tracing, parse_config_path};

/// Notification buffer per subscriber.
const NOTIFICATION_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(parse_config_path().as_deref())?;
    let store = init_storage(&config.storage)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let notifier = Arc::new(BroadcastNotifier::new(NOTIFICATION_CAPACITY));
    let engine = Arc::new(
        CashbackEngine::from_config(
            &config,
            store.clone(),
            Arc::new(InMemoryLedger::new()),
            notifier,
        )
        .with_shutdown(shutdown_rx),
    );

    let scheduler = Arc::new(
        ScheduleManager::new(store.clone().as_schedule_store())
            .with_interval(config.schedule.interval()),
    )
    .start();
    let expiry = spawn_expiry_task(engine.clone(), config.maintenance.expiry_interval());
    let sweep = spawn_retry_sweep_task(engine.clone(), config.maintenance.retry_sweep_interval());

    let (feed_tx, feed_rx) = feed_channel(config.feed.channel_capacity);
    let feed = spawn_wager_feed(engine.clone(), feed_rx);
    let reader = tokio::spawn(forward_stdin(feed_tx));

    info!(
        storage = ?config.storage.storage_type,
        schedule_interval_secs = config.schedule.interval_secs,
        "rakeback-worker started"
    );
    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    reader.abort();

    let stats = feed.shutdown().await;
    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        failed = stats.failed,
        "Wager feed drained"
    );
    sweep.shutdown().await;
    expiry.shutdown().await;
    scheduler.shutdown().await;

    info!("rakeback-worker stopped");
    Ok(())
}

/// Forward each stdin line to the wager feed until stdin closes.
async fn forward_stdin(feed: mpsc::Sender<Vec<u8>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if feed.send(line.as_bytes().to_vec()).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("stdin closed, no more wager events");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read wager event from stdin");
                break;
            }
        }
    }
}
