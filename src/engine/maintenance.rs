//! Periodic maintenance tasks.
//!
//! - expiry: marks earnings past their TTL as expired
//! - retry sweep: replays failed and stale retryable operations
//!
//! Both run until stopped through their handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use super::{CashbackEngine, Result};
use crate::scheduler::ScheduleHandle;

/// Spawn the earning expiry task.
pub fn spawn_expiry_task(engine: Arc<CashbackEngine>, interval: Duration) -> ScheduleHandle {
    spawn_periodic("earning expiry", interval, move || {
        let engine = engine.clone();
        async move { engine.expire_earnings().await.map(|_| ()) }
    })
}

/// Spawn the retry sweep task.
pub fn spawn_retry_sweep_task(engine: Arc<CashbackEngine>, interval: Duration) -> ScheduleHandle {
    spawn_periodic("retry sweep", interval, move || {
        let engine = engine.clone();
        async move { engine.retry_failed_operations().await.map(|_| ()) }
    })
}

fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut run: F) -> ScheduleHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(task = name, interval_secs = interval.as_secs(), "Maintenance task started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = run().await {
                        error!(task = name, error = %e, "Maintenance task failed");
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!(task = name, "Maintenance task stopped");
                        break;
                    }
                }
            }
        }
    });

    ScheduleHandle::new(cancel_tx, task)
}
