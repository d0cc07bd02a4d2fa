//! Mock storage implementation for testing.
//!
//! All entities live behind one lock so multi-entity operations
//! (`record_earning`, `consume_earnings`) are atomic, matching the
//! transactional guarantees of the SQL backends.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Allocation, ClaimStore, EarningStore, HouseEdgeStore, MetricDelta, OperationStore,
    OverrideStore, ProgressUpdate, Result, ScheduleStore, StorageError, TierStore, UserStateStore,
};
use crate::model::{
    Claim, Earning, EarningStatus, GlobalRateOverride, HouseEdge, OperationStatus,
    RetryableOperation, ScheduledRateWindow, Tier, UserTierState, WindowStatus,
};


#[derive(Default)]
struct MockState {
    tiers: HashMap<Uuid, Tier>,
    house_edges: HashMap<(String, Option<String>), HouseEdge>,
    users: HashMap<Uuid, UserTierState>,
    global_override: Option<GlobalRateOverride>,
    windows: HashMap<Uuid, ScheduledRateWindow>,
    earnings: HashMap<Uuid, Earning>,
    claims: Vec<Claim>,
    operations: HashMap<Uuid, RetryableOperation>,
}

/// In-memory store implementing every storage contract.
#[derive(Default)]
pub struct MockStore {
    state: RwLock<MockState>,
    fail_record_earning: RwLock<u32>,
    record_earning_calls: RwLock<u32>,
    fail_on_create_claim: RwLock<bool>,
    fail_on_create_operation: RwLock<bool>,
    fail_on_record_progress: RwLock<bool>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls to `record_earning` fail as unavailable.
    pub async fn set_fail_record_earning(&self, times: u32) {
        *self.fail_record_earning.write().await = times;
    }

    /// Number of `record_earning` calls, failed ones included.
    pub async fn record_earning_calls(&self) -> u32 {
        *self.record_earning_calls.read().await
    }

    pub async fn set_fail_on_create_claim(&self, fail: bool) {
        *self.fail_on_create_claim.write().await = fail;
    }

    pub async fn set_fail_on_create_operation(&self, fail: bool) {
        *self.fail_on_create_operation.write().await = fail;
    }

    pub async fn set_fail_on_record_progress(&self, fail: bool) {
        *self.fail_on_record_progress.write().await = fail;
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Unavailable(format!("injected {what} failure"))
    }
}

fn sorted_windows(mut windows: Vec<ScheduledRateWindow>) -> Vec<ScheduledRateWindow> {
    windows.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.id.cmp(&b.id)));
    windows
}

fn sorted_earnings(mut earnings: Vec<Earning>) -> Vec<Earning> {
    earnings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    earnings
}

#[async_trait]
impl TierStore for MockStore {
    async fn put_tier(&self, tier: Tier) -> Result<()> {
        self.state.write().await.tiers.insert(tier.id, tier);
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> Result<Option<Tier>> {
        Ok(self.state.read().await.tiers.get(&id).cloned())
    }

    async fn get_tier_by_level(&self, level: u32) -> Result<Option<Tier>> {
        let state = self.state.read().await;
        Ok(state.tiers.values().find(|t| t.level == level).cloned())
    }

    async fn list_tiers(&self, active_only: bool) -> Result<Vec<Tier>> {
        let state = self.state.read().await;
        let mut tiers: Vec<Tier> = state
            .tiers
            .values()
            .filter(|t| !active_only || t.active)
            .cloned()
            .collect();
        tiers.sort_by_key(|t| t.level);
        Ok(tiers)
    }
}

#[async_trait]
impl HouseEdgeStore for MockStore {
    async fn put_house_edge(&self, edge: HouseEdge) -> Result<()> {
        let key = (edge.game_type.clone(), edge.game_variant.clone());
        self.state.write().await.house_edges.insert(key, edge);
        Ok(())
    }

    async fn find_house_edge(
        &self,
        game_type: &str,
        game_variant: Option<&str>,
    ) -> Result<Option<HouseEdge>> {
        let state = self.state.read().await;
        let lookup = |variant: Option<&str>| {
            state
                .house_edges
                .get(&(game_type.to_string(), variant.map(str::to_string)))
                .filter(|e| e.active)
                .cloned()
        };
        if let Some(variant) = game_variant {
            if let Some(edge) = lookup(Some(variant)) {
                return Ok(Some(edge));
            }
        }
        Ok(lookup(None))
    }
}

#[async_trait]
impl UserStateStore for MockStore {
    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserTierState>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn create_user_state(&self, state: UserTierState) -> Result<UserTierState> {
        let mut guard = self.state.write().await;
        let stored = guard.users.entry(state.user_id).or_insert(state);
        Ok(stored.clone())
    }

    async fn record_progress(&self, update: ProgressUpdate) -> Result<bool> {
        if *self.fail_on_record_progress.read().await {
            return Err(Self::injected("record_progress"));
        }
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(&update.user_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "user tier state",
                id: update.user_id.to_string(),
            })?;
        if update.current_level < user.current_level
            || user.cumulative_revenue != update.observed_revenue
        {
            return Ok(false);
        }
        user.current_tier_id = update.current_tier_id;
        user.current_level = update.current_level;
        if !user.effective_overridden {
            user.effective_tier_id = update.current_tier_id;
            user.effective_level = update.current_level;
        }
        user.progress = update.progress;
        if update.promoted_at.is_some() {
            user.last_promoted_at = update.promoted_at;
        }
        user.updated_at = update.at;
        Ok(true)
    }

    async fn set_effective_tier(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        level: u32,
        overridden: bool,
    ) -> Result<()> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "user tier state",
                id: user_id.to_string(),
            })?;
        user.effective_tier_id = tier_id;
        user.effective_level = level;
        user.effective_overridden = overridden;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for MockStore {
    async fn get_override(&self) -> Result<GlobalRateOverride> {
        Ok(self
            .state
            .read()
            .await
            .global_override
            .clone()
            .unwrap_or_default())
    }

    async fn swap_override(
        &self,
        mut next: GlobalRateOverride,
        expected_version: u64,
    ) -> Result<GlobalRateOverride> {
        let mut guard = self.state.write().await;
        let current = guard
            .global_override
            .as_ref()
            .map(|o| o.version)
            .unwrap_or(0);
        if current != expected_version {
            return Err(StorageError::Conflict {
                entity: "global rate override",
                id: current.to_string(),
            });
        }
        next.version = expected_version + 1;
        guard.global_override = Some(next.clone());
        Ok(next)
    }
}

#[async_trait]
impl ScheduleStore for MockStore {
    async fn create_window(&self, window: ScheduledRateWindow) -> Result<()> {
        let mut guard = self.state.write().await;
        if guard.windows.contains_key(&window.id) {
            return Err(StorageError::Conflict {
                entity: "rate window",
                id: window.id.to_string(),
            });
        }
        guard.windows.insert(window.id, window);
        Ok(())
    }

    async fn get_window(&self, id: Uuid) -> Result<Option<ScheduledRateWindow>> {
        Ok(self.state.read().await.windows.get(&id).cloned())
    }

    async fn list_windows(&self, status: Option<WindowStatus>) -> Result<Vec<ScheduledRateWindow>> {
        let state = self.state.read().await;
        Ok(sorted_windows(
            state
                .windows
                .values()
                .filter(|w| status.map_or(true, |s| w.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn update_window(&self, window: ScheduledRateWindow) -> Result<bool> {
        let mut guard = self.state.write().await;
        match guard.windows.get_mut(&window.id) {
            Some(stored) if stored.status == WindowStatus::Scheduled => {
                stored.name = window.name;
                stored.description = window.description;
                stored.percentage = window.percentage;
                stored.scope = window.scope;
                stored.starts_at = window.starts_at;
                stored.ends_at = window.ends_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn windows_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let state = self.state.read().await;
        Ok(sorted_windows(
            state
                .windows
                .values()
                .filter(|w| w.status == WindowStatus::Scheduled && w.starts_at <= now)
                .cloned()
                .collect(),
        ))
    }

    async fn windows_to_deactivate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let state = self.state.read().await;
        Ok(sorted_windows(
            state
                .windows
                .values()
                .filter(|w| w.status == WindowStatus::Active && w.ends_at <= now)
                .cloned()
                .collect(),
        ))
    }

    async fn live_windows(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let state = self.state.read().await;
        Ok(sorted_windows(
            state
                .windows
                .values()
                .filter(|w| w.is_live(now))
                .cloned()
                .collect(),
        ))
    }

    async fn transition_window(
        &self,
        id: Uuid,
        from: WindowStatus,
        to: WindowStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut guard = self.state.write().await;
        match guard.windows.get_mut(&id) {
            Some(window) if window.status == from => {
                window.status = to;
                match to {
                    WindowStatus::Active => window.activated_at = Some(at),
                    WindowStatus::Completed | WindowStatus::Cancelled => {
                        window.deactivated_at = Some(at)
                    }
                    WindowStatus::Scheduled => {}
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EarningStore for MockStore {
    async fn record_earning(&self, earning: &Earning, delta: MetricDelta) -> Result<bool> {
        *self.record_earning_calls.write().await += 1;
        {
            let mut remaining = self.fail_record_earning.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Self::injected("record_earning"));
            }
        }

        let mut guard = self.state.write().await;
        if guard.earnings.contains_key(&earning.id) {
            return Ok(false);
        }
        let user = guard
            .users
            .get_mut(&earning.user_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "user tier state",
                id: earning.user_id.to_string(),
            })?;
        user.cumulative_revenue += delta.revenue;
        user.cumulative_wagered += delta.wagered;
        user.cumulative_payout += delta.payout;
        user.updated_at = earning.created_at;
        guard.earnings.insert(earning.id, earning.clone());
        Ok(true)
    }

    async fn get_earning(&self, id: Uuid) -> Result<Option<Earning>> {
        Ok(self.state.read().await.earnings.get(&id).cloned())
    }

    async fn earnings_for_user(&self, user_id: Uuid) -> Result<Vec<Earning>> {
        let state = self.state.read().await;
        Ok(sorted_earnings(
            state
                .earnings
                .values()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn claimable_earnings(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Earning>> {
        let state = self.state.read().await;
        Ok(sorted_earnings(
            state
                .earnings
                .values()
                .filter(|e| e.user_id == user_id && e.is_claimable(now))
                .cloned()
                .collect(),
        ))
    }

    async fn consume_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()> {
        let mut guard = self.state.write().await;
        for alloc in allocations {
            let ok = guard.earnings.get(&alloc.earning_id).is_some_and(|e| {
                e.version == alloc.expected_version
                    && e.is_claimable(now)
                    && e.available >= alloc.amount
            });
            if !ok {
                return Err(StorageError::Conflict {
                    entity: "earning",
                    id: alloc.earning_id.to_string(),
                });
            }
        }
        for alloc in allocations {
            if let Some(earning) = guard.earnings.get_mut(&alloc.earning_id) {
                earning.consume(alloc.amount, now);
            }
        }
        Ok(())
    }

    async fn release_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()> {
        let mut guard = self.state.write().await;
        for alloc in allocations {
            if let Some(earning) = guard.earnings.get_mut(&alloc.earning_id) {
                earning.release(alloc.amount, now);
            }
        }
        Ok(())
    }

    async fn expire_earnings(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.state.write().await;
        let mut expired = 0;
        for earning in guard.earnings.values_mut() {
            if earning.status == EarningStatus::Available && earning.expires_at <= now {
                earning.status = EarningStatus::Expired;
                earning.updated_at = now;
                earning.version += 1;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl ClaimStore for MockStore {
    async fn create_claim(&self, claim: &Claim) -> Result<()> {
        if *self.fail_on_create_claim.read().await {
            return Err(Self::injected("create_claim"));
        }
        self.state.write().await.claims.push(claim.clone());
        Ok(())
    }

    async fn claims_for_user(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        let state = self.state.read().await;
        let mut claims: Vec<Claim> = state
            .claims
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(claims)
    }

    async fn claimed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .claims
            .iter()
            .filter(|c| c.user_id == user_id && c.created_at >= since)
            .map(|c| c.amount)
            .sum())
    }
}

#[async_trait]
impl OperationStore for MockStore {
    async fn create_operation(&self, op: &RetryableOperation) -> Result<()> {
        if *self.fail_on_create_operation.read().await {
            return Err(Self::injected("create_operation"));
        }
        self.state.write().await.operations.insert(op.id, op.clone());
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<RetryableOperation>> {
        Ok(self.state.read().await.operations.get(&id).cloned())
    }

    async fn update_operation(
        &self,
        op: &RetryableOperation,
        expected_version: u64,
    ) -> Result<bool> {
        let mut guard = self.state.write().await;
        match guard.operations.get_mut(&op.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = op.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn operations_for_user(&self, user_id: Uuid) -> Result<Vec<RetryableOperation>> {
        let state = self.state.read().await;
        let mut ops: Vec<RetryableOperation> = state
            .operations
            .values()
            .filter(|o| o.owner == user_id)
            .cloned()
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ops)
    }

    async fn failed_operations(&self, now: DateTime<Utc>) -> Result<Vec<RetryableOperation>> {
        let state = self.state.read().await;
        let mut ops: Vec<RetryableOperation> = state
            .operations
            .values()
            .filter(|o| {
                o.status == OperationStatus::Failed && o.next_attempt_at.map_or(true, |t| t <= now)
            })
            .cloned()
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ops)
    }

    async fn stale_operations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RetryableOperation>> {
        let state = self.state.read().await;
        let mut ops: Vec<RetryableOperation> = state
            .operations
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    OperationStatus::Pending | OperationStatus::Retrying
                ) && o.updated_at < updated_before
            })
            .cloned()
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ops)
    }
}
