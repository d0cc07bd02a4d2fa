//! Promotional rate window scheduler.
//!
//! The `ScheduleManager` runs as a background task, activating scheduled
//! windows whose start has passed and completing active windows whose end has
//! passed. Every transition is a conditional update on the window's current
//! status, so concurrent ticks (or several workers) apply each boundary
//! exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::WindowStatus;
use crate::storage::{ScheduleStore, StorageError};

#[cfg(test)]
mod tests;

/// Transitions applied by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub activated: usize,
    pub completed: usize,
}

pub struct ScheduleManager {
    store: Arc<dyn ScheduleStore>,
    interval: Duration,
}

impl ScheduleManager {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(60),
        }
    }

    /// Set custom tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick at the current time.
    pub async fn process_schedules(&self) -> Result<TickReport, StorageError> {
        self.process_schedules_at(Utc::now()).await
    }

    /// Run one tick as of `now`.
    ///
    /// Activation runs before deactivation, so a window whose whole span
    /// passed between ticks is activated and completed in the same tick.
    pub async fn process_schedules_at(&self, now: DateTime<Utc>) -> Result<TickReport, StorageError> {
        let mut report = TickReport::default();

        for window in self.store.windows_to_activate(now).await? {
            match self
                .store
                .transition_window(window.id, WindowStatus::Scheduled, WindowStatus::Active, now)
                .await
            {
                Ok(true) => {
                    report.activated += 1;
                    info!(
                        window_id = %window.id,
                        name = %window.name,
                        percentage = %window.percentage,
                        scope = window.scope.kind(),
                        "Rate window activated"
                    );
                }
                Ok(false) => debug!(window_id = %window.id, "Window already left scheduled"),
                Err(e) => warn!(window_id = %window.id, error = %e, "Failed to activate window"),
            }
        }

        for window in self.store.windows_to_deactivate(now).await? {
            match self
                .store
                .transition_window(window.id, WindowStatus::Active, WindowStatus::Completed, now)
                .await
            {
                Ok(true) => {
                    report.completed += 1;
                    info!(
                        window_id = %window.id,
                        name = %window.name,
                        "Rate window completed"
                    );
                }
                Ok(false) => debug!(window_id = %window.id, "Window already left active"),
                Err(e) => warn!(window_id = %window.id, error = %e, "Failed to complete window"),
            }
        }

        Ok(report)
    }

    /// Spawn the manager as a background task. The first tick runs
    /// immediately.
    pub fn start(self: Arc<Self>) -> ScheduleHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval = ?self.interval, "Schedule manager started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.process_schedules().await {
                            error!(error = %e, "Schedule tick failed");
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Schedule manager stopped");
                            break;
                        }
                    }
                }
            }
        });

        ScheduleHandle::new(cancel_tx, task)
    }
}

/// Handle to a running background task. Dropping it also stops the task.
pub struct ScheduleHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub(crate) fn new(cancel: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Signal the task to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}
