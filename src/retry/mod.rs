//! Retry orchestration for financial side effects.
//!
//! Each unit of work is tracked as a [`RetryableOperation`] so it can be
//! resumed after a crash or replayed by an operator. Delays use capped
//! exponential backoff with symmetric jitter.
//!
//! Persistence of the tracking record is best-effort: if it fails the work
//! still runs, just untracked. Every tracking update is version-guarded so a
//! sweep and a live runner never both drive the same operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RetrySettings;
use crate::model::{OperationPayload, OperationStatus, RetryableOperation};
use crate::storage::{OperationStore, StorageError};


/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry (before jitter).
    pub initial_delay: Duration,
    /// Maximum delay cap (before jitter).
    pub max_delay: Duration,
    /// Maximum number of retries (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter factor: delay is multiplied by a random value in
    /// [1-jitter, 1+jitter]. Set to 0.0 for no jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_retries: settings.max_retries,
            multiplier: settings.multiplier.max(1.0),
            jitter: if settings.jitter.is_finite() {
                settings.jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt + 1` (0-indexed), without jitter.
    ///
    /// `min(max_delay, initial_delay * multiplier^attempt)`
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(64) as i32;
        let exponential_ms = initial_ms * self.multiplier.powi(exponent);
        Duration::from_millis(exponential_ms.min(max_ms) as u64)
    }

    /// Delay before retry number `attempt + 1` (0-indexed), with jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for_attempt(attempt);
        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return capped;
        }
        let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((capped.as_millis() as f64 * factor) as u64)
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every execution failed. `attempts` counts executions, including the
    /// first.
    #[error("Operation {operation_id} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation_id: Uuid,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// Shutdown was signalled during a backoff wait. The operation stays
    /// resumable.
    #[error("Operation {operation_id} cancelled during backoff")]
    Cancelled { operation_id: Uuid },

    #[error("Operation not found: {0}")]
    NotFound(Uuid),

    /// Listing, loading or claiming operations failed. Payload decode
    /// failures surface here as `StorageError::Decode`.
    #[error("Operation storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Re-executes a persisted operation from its typed payload.
#[async_trait]
pub trait OperationReplayer: Send + Sync {
    async fn replay(&self, payload: &OperationPayload) -> Result<(), StorageError>;
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Completed already, or claimed by someone else first.
    pub skipped: usize,
}

/// Executes units of work with bounded exponential backoff.
pub struct RetryOrchestrator {
    store: Arc<dyn OperationStore>,
    config: RetryConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryOrchestrator {
    pub fn new(store: Arc<dyn OperationStore>, config: RetryConfig) -> Self {
        Self {
            store,
            config,
            shutdown: None,
        }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancel backoff waits once `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Track `payload` as a new operation owned by `owner` and run `work`
    /// until it succeeds or `max_retries` retries have failed.
    pub async fn run_with_retry<F, Fut>(
        &self,
        owner: Uuid,
        payload: OperationPayload,
        work: F,
    ) -> Result<(), RetryError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), StorageError>> + Send,
    {
        let op = RetryableOperation::new(owner, payload, Utc::now());
        let tracked = match self.store.create_operation(&op).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    operation_id = %op.id,
                    kind = op.kind().as_str(),
                    error = %e,
                    "Failed to persist retryable operation, running untracked"
                );
                false
            }
        };
        self.drive(op, tracked, work).await
    }

    /// Resume failed operations that are due and stale in-flight operations
    /// not updated for `stale_after`.
    ///
    /// Failed operations start a fresh retry cycle; stale ones continue from
    /// their recorded attempt count.
    pub async fn retry_failed_operations(
        &self,
        replayer: &dyn OperationReplayer,
        stale_after: Duration,
    ) -> Result<SweepReport, RetryError> {
        let now = Utc::now();
        let stale_cutoff = now
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());

        let mut candidates = self.store.failed_operations(now).await?;
        candidates.extend(self.store.stale_operations(stale_cutoff).await?);
        info!(count = candidates.len(), "Retrying failed and stale operations");

        let mut report = SweepReport::default();
        for op in candidates {
            let reset = op.status == OperationStatus::Failed;
            let Some(claimed) = self.claim(op, reset).await? else {
                report.skipped += 1;
                continue;
            };
            match self.replay(claimed, replayer).await {
                Ok(()) => report.succeeded += 1,
                Err(RetryError::Cancelled { .. }) => {
                    info!("Sweep interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "Swept operation failed again");
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Completed retry sweep"
        );
        Ok(report)
    }

    /// Reset an operation's attempts to zero and run it again.
    ///
    /// A completed operation is left alone.
    pub async fn manual_retry(
        &self,
        operation_id: Uuid,
        replayer: &dyn OperationReplayer,
    ) -> Result<(), RetryError> {
        let op = self
            .store
            .get_operation(operation_id)
            .await?
            .ok_or(RetryError::NotFound(operation_id))?;

        info!(operation_id = %operation_id, kind = op.kind().as_str(), "Manual retry requested");

        match self.claim(op, true).await? {
            Some(claimed) => self.replay(claimed, replayer).await,
            None => Ok(()),
        }
    }

    pub async fn operations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RetryableOperation>, RetryError> {
        Ok(self.store.operations_for_user(user_id).await?)
    }

    /// Failed operations whose next attempt is due.
    pub async fn failed_operations(&self) -> Result<Vec<RetryableOperation>, RetryError> {
        Ok(self.store.failed_operations(Utc::now()).await?)
    }

    async fn replay(
        &self,
        op: RetryableOperation,
        replayer: &dyn OperationReplayer,
    ) -> Result<(), RetryError> {
        let payload = op.payload.clone();
        self.drive(op, true, || replayer.replay(&payload)).await
    }

    /// Take ownership of `op` by moving it to `retrying` under its version.
    ///
    /// Returns `None` if it is already completed or another runner won.
    async fn claim(
        &self,
        mut op: RetryableOperation,
        reset_attempts: bool,
    ) -> Result<Option<RetryableOperation>, RetryError> {
        if op.status == OperationStatus::Completed {
            info!(operation_id = %op.id, "Operation already completed, skipping");
            return Ok(None);
        }

        let expected = op.version;
        op.version += 1;
        op.status = OperationStatus::Retrying;
        op.next_attempt_at = None;
        op.updated_at = Utc::now();
        if reset_attempts {
            op.attempts = 0;
        }

        if self.store.update_operation(&op, expected).await? {
            Ok(Some(op))
        } else {
            info!(operation_id = %op.id, "Operation claimed by another runner, skipping");
            Ok(None)
        }
    }

    async fn drive<F, Fut>(
        &self,
        mut op: RetryableOperation,
        mut tracked: bool,
        mut work: F,
    ) -> Result<(), RetryError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), StorageError>> + Send,
    {
        loop {
            match work().await {
                Ok(()) => {
                    op.status = OperationStatus::Completed;
                    op.last_error = None;
                    op.next_attempt_at = None;
                    self.persist(&mut op, &mut tracked).await;
                    info!(
                        operation_id = %op.id,
                        kind = op.kind().as_str(),
                        retries = op.attempts,
                        "Operation completed"
                    );
                    return Ok(());
                }
                Err(e) => {
                    op.last_error = Some(e.to_string());

                    if !self.config.should_retry(op.attempts) {
                        op.status = OperationStatus::Failed;
                        op.next_attempt_at = None;
                        self.persist(&mut op, &mut tracked).await;
                        error!(
                            operation_id = %op.id,
                            owner = %op.owner,
                            kind = op.kind().as_str(),
                            attempts = op.attempts + 1,
                            error = %e,
                            "Operation failed after exhausting retries"
                        );
                        return Err(RetryError::Exhausted {
                            operation_id: op.id,
                            attempts: op.attempts + 1,
                            source: e,
                        });
                    }

                    let delay = self.config.delay_for_attempt(op.attempts);
                    op.attempts += 1;
                    op.status = OperationStatus::Retrying;
                    op.next_attempt_at = chrono::Duration::from_std(delay)
                        .ok()
                        .map(|d| Utc::now() + d);
                    self.persist(&mut op, &mut tracked).await;
                    warn!(
                        operation_id = %op.id,
                        kind = op.kind().as_str(),
                        attempt = op.attempts,
                        max_retries = self.config.max_retries,
                        delay = ?delay,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    if !self.wait(delay).await {
                        info!(operation_id = %op.id, "Retry wait cancelled by shutdown");
                        return Err(RetryError::Cancelled {
                            operation_id: op.id,
                        });
                    }
                }
            }
        }
    }

    /// Write `op` under its current version. Stops tracking if another
    /// runner changed the record.
    async fn persist(&self, op: &mut RetryableOperation, tracked: &mut bool) {
        if !*tracked {
            return;
        }
        let expected = op.version;
        op.version += 1;
        op.updated_at = Utc::now();

        match self.store.update_operation(op, expected).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    operation_id = %op.id,
                    "Operation record changed concurrently, continuing untracked"
                );
                *tracked = false;
            }
            Err(e) => {
                op.version = expected;
                warn!(operation_id = %op.id, error = %e, "Failed to persist operation state");
            }
        }
    }

    /// Sleep for `delay`. Returns `false` if shutdown was signalled first.
    async fn wait(&self, delay: Duration) -> bool {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return true;
        };
        let mut shutdown = shutdown.clone();
        if *shutdown.borrow_and_update() {
            return false;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: nobody can cancel any more.
                        (&mut sleep).await;
                        return true;
                    }
                    if *shutdown.borrow_and_update() {
                        return false;
                    }
                }
            }
        }
    }
}
