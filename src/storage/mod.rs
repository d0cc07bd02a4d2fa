//! Storage contracts and implementations.
//!
//! Every mutation that can race is expressed as a conditional update:
//! - status transitions only apply if the row is still in the expected status
//! - earnings, operations and the override singleton are version-guarded
//! - progression updates refuse to lower the stored tier level
//! - cumulative metrics are incremented inside the store, never
//!   read-modified-written by callers
//!
//! Implementations:
//! - `MockStore`: in-memory, with failure injection for tests
//! - `SqliteStore`: sqlx + sea-query (feature `sqlite`)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
#[cfg(not(feature = "sqlite"))]
use tracing::error;
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::model::{
    Claim, Earning, GlobalRateOverride, HouseEdge, RetryableOperation, ScheduledRateWindow, Tier,
    UnknownVariant, UserTierState, WindowStatus,
};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Version conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "sqlite")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<UnknownVariant> for StorageError {
    fn from(err: UnknownVariant) -> Self {
        StorageError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Decode(err.to_string())
    }
}

/// Cumulative metrics added to a user's state alongside a new earning.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricDelta {
    pub revenue: Decimal,
    pub wagered: Decimal,
    pub payout: Decimal,
}

/// Portion of one earning consumed by a claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub earning_id: Uuid,
    pub amount: Decimal,
    /// Version observed when the allocation was planned.
    pub expected_version: u64,
}

/// Progression result to persist for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub user_id: Uuid,
    pub current_tier_id: Uuid,
    pub current_level: u32,
    pub progress: Decimal,
    /// Cumulative revenue the level and progress were computed from.
    pub observed_revenue: Decimal,
    /// Set when this update is a promotion.
    pub promoted_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait TierStore: Send + Sync {
    /// Insert or replace a tier by id.
    async fn put_tier(&self, tier: Tier) -> Result<()>;

    async fn get_tier(&self, id: Uuid) -> Result<Option<Tier>>;

    async fn get_tier_by_level(&self, level: u32) -> Result<Option<Tier>>;

    /// Tiers ordered ascending by level.
    async fn list_tiers(&self, active_only: bool) -> Result<Vec<Tier>>;
}

#[async_trait]
pub trait HouseEdgeStore: Send + Sync {
    /// Insert or replace the edge for (game_type, game_variant).
    async fn put_house_edge(&self, edge: HouseEdge) -> Result<()>;

    /// Active edge for the exact variant, falling back to the game type's
    /// variant-less row.
    async fn find_house_edge(
        &self,
        game_type: &str,
        game_variant: Option<&str>,
    ) -> Result<Option<HouseEdge>>;
}

#[async_trait]
pub trait UserStateStore: Send + Sync {
    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserTierState>>;

    /// Insert if absent. Returns the stored row, which is the existing one if
    /// another caller bootstrapped the user first.
    async fn create_user_state(&self, state: UserTierState) -> Result<UserTierState>;

    /// Apply a progression result unless it would lower the stored level or
    /// the stored cumulative revenue no longer matches `observed_revenue`.
    /// The effective tier follows the current tier unless pinned.
    ///
    /// Returns `false` when either guard rejected the update.
    async fn record_progress(&self, update: ProgressUpdate) -> Result<bool>;

    /// Pin (`overridden = true`) or reset the effective tier.
    async fn set_effective_tier(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        level: u32,
        overridden: bool,
    ) -> Result<()>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Current override row; the disabled default if none was ever written.
    async fn get_override(&self) -> Result<GlobalRateOverride>;

    /// Replace the override if its stored version equals `expected_version`.
    /// The stored row gets version `expected_version + 1`.
    async fn swap_override(
        &self,
        next: GlobalRateOverride,
        expected_version: u64,
    ) -> Result<GlobalRateOverride>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_window(&self, window: ScheduledRateWindow) -> Result<()>;

    async fn get_window(&self, id: Uuid) -> Result<Option<ScheduledRateWindow>>;

    /// Windows ordered by start time, optionally filtered by status.
    async fn list_windows(&self, status: Option<WindowStatus>) -> Result<Vec<ScheduledRateWindow>>;

    /// Replace a window's editable fields, only while it is still scheduled.
    async fn update_window(&self, window: ScheduledRateWindow) -> Result<bool>;

    /// Scheduled windows with `starts_at <= now`.
    async fn windows_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>>;

    /// Active windows with `ends_at <= now`.
    async fn windows_to_deactivate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>>;

    /// Active windows with `starts_at <= now < ends_at`.
    async fn live_windows(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>>;

    /// Move `id` from `from` to `to` only if it is still in `from`.
    async fn transition_window(
        &self,
        id: Uuid,
        from: WindowStatus,
        to: WindowStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait EarningStore: Send + Sync {
    /// Insert the earning if its id is new and, in the same atomic step, add
    /// `delta` to the owner's cumulative metrics.
    ///
    /// Returns `false` (and changes nothing) if the earning already exists.
    async fn record_earning(&self, earning: &Earning, delta: MetricDelta) -> Result<bool>;

    async fn get_earning(&self, id: Uuid) -> Result<Option<Earning>>;

    /// All earnings of a user, oldest first.
    async fn earnings_for_user(&self, user_id: Uuid) -> Result<Vec<Earning>>;

    /// Available, unexpired earnings with a positive balance, oldest first.
    async fn claimable_earnings(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Earning>>;

    /// Consume every allocation or none. Fails with `Conflict` if any earning
    /// changed version or no longer has enough available.
    async fn consume_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()>;

    /// Give back amounts taken by `consume_earnings`.
    async fn release_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()>;

    /// Mark available earnings past expiry as expired. Returns the count.
    async fn expire_earnings(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn create_claim(&self, claim: &Claim) -> Result<()>;

    /// Claims of a user, newest first.
    async fn claims_for_user(&self, user_id: Uuid) -> Result<Vec<Claim>>;

    /// Sum of claim amounts created at or after `since`.
    async fn claimed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal>;
}

#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn create_operation(&self, op: &RetryableOperation) -> Result<()>;

    async fn get_operation(&self, id: Uuid) -> Result<Option<RetryableOperation>>;

    /// Replace the operation if its stored version equals `expected_version`.
    /// The caller sets `op.version` to the new version.
    async fn update_operation(&self, op: &RetryableOperation, expected_version: u64)
        -> Result<bool>;

    async fn operations_for_user(&self, user_id: Uuid) -> Result<Vec<RetryableOperation>>;

    /// Failed operations whose next attempt time has passed (or is unset).
    async fn failed_operations(&self, now: DateTime<Utc>) -> Result<Vec<RetryableOperation>>;

    /// Pending or retrying operations last touched before `updated_before`;
    /// their runner most likely crashed.
    async fn stale_operations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RetryableOperation>>;
}

/// Every contract the engine needs, implemented by each backend.
pub trait CashbackStore:
    TierStore
    + HouseEdgeStore
    + UserStateStore
    + OverrideStore
    + ScheduleStore
    + EarningStore
    + ClaimStore
    + OperationStore
{
    fn as_schedule_store(self: Arc<Self>) -> Arc<dyn ScheduleStore>;

    fn as_operation_store(self: Arc<Self>) -> Arc<dyn OperationStore>;
}

impl<T> CashbackStore for T
where
    T: TierStore
        + HouseEdgeStore
        + UserStateStore
        + OverrideStore
        + ScheduleStore
        + EarningStore
        + ClaimStore
        + OperationStore
        + 'static,
{
    fn as_schedule_store(self: Arc<Self>) -> Arc<dyn ScheduleStore> {
        self
    }

    fn as_operation_store(self: Arc<Self>) -> Arc<dyn OperationStore> {
        self
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn CashbackStore>, Box<dyn std::error::Error + Send + Sync>> {
    info!(storage_type = ?config.storage_type, path = %config.path, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MockStore::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = SqliteStore::connect(&config.path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
