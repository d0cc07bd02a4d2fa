//! Administrative operations: rate configuration, tiers, manual earnings,
//! reporting and operator access to retryable operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{CashbackEngine, CashbackError, Result};
use crate::model::{
    round_money, Claim, ClaimStatus, Earning, EarningKind, EarningStatus, GlobalRateOverride, HouseEdge,
    ManualEarningPayload, OperationPayload, RateSource, RetryableOperation, ScheduledRateWindow,
    Tier, UserTierState, WindowScope, WindowStatus,
};
use crate::notify::Notification;
use crate::progression::{ProgressionDetail, ProgressionOutcome};
use crate::retry::SweepReport;
use crate::storage::{MetricDelta, StorageError};

/// Attempts at the override compare-and-swap before giving up.
const OVERRIDE_SWAP_ATTEMPTS: u32 = 3;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Fields of a window to create.
#[derive(Debug, Clone)]
pub struct NewWindow {
    pub name: String,
    pub description: Option<String>,
    pub percentage: Decimal,
    pub scope: WindowScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Editable fields of a scheduled window.
#[derive(Debug, Clone)]
pub struct WindowUpdate {
    pub name: String,
    pub description: Option<String>,
    pub percentage: Decimal,
    pub scope: WindowScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Totals and tier information for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashbackSummary {
    pub user_id: Uuid,
    pub current_tier: Option<Tier>,
    pub effective_tier: Option<Tier>,
    pub progress: Decimal,
    pub cumulative_revenue: Decimal,
    pub total_earned: Decimal,
    pub total_claimed: Decimal,
    /// Claimable right now.
    pub available: Decimal,
    pub global_override_active: bool,
    /// Rate a new wager would get from the override, if it is on.
    pub override_percentage: Option<Decimal>,
}

fn validate_percentage(what: &str, percentage: Decimal) -> Result<()> {
    if percentage < Decimal::ZERO || percentage > HUNDRED {
        return Err(CashbackError::Validation(format!(
            "{what} percentage must be within [0, 100], got {percentage}"
        )));
    }
    Ok(())
}

fn validate_window(
    name: &str,
    percentage: Decimal,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CashbackError::Validation("window name must not be empty".to_string()));
    }
    validate_percentage("window", percentage)?;
    if ends_at <= starts_at {
        return Err(CashbackError::Validation(format!(
            "window must end after it starts ({starts_at} >= {ends_at})"
        )));
    }
    Ok(())
}

fn not_found(entity: &'static str, id: impl ToString) -> CashbackError {
    CashbackError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl CashbackEngine {
    // ========================================================================
    // Global override
    // ========================================================================

    pub async fn global_override(&self) -> Result<GlobalRateOverride> {
        Ok(self.store.get_override().await?)
    }

    /// Turn the global override on or off.
    pub async fn set_global_override(
        &self,
        admin_id: Uuid,
        enabled: bool,
        percentage: Decimal,
    ) -> Result<GlobalRateOverride> {
        validate_percentage("override", percentage)?;

        for _ in 0..OVERRIDE_SWAP_ATTEMPTS {
            let current = self.store.get_override().await?;
            let now = Utc::now();
            let mut next = current.clone();
            next.enabled = enabled;
            next.percentage = percentage;
            if enabled {
                next.enabled_by = Some(admin_id);
                next.enabled_at = Some(now);
            } else {
                next.disabled_by = Some(admin_id);
                next.disabled_at = Some(now);
            }

            match self.store.swap_override(next, current.version).await {
                Ok(stored) => {
                    info!(
                        admin_id = %admin_id,
                        enabled,
                        percentage = %percentage,
                        version = stored.version,
                        "Global rate override updated"
                    );
                    return Ok(stored);
                }
                Err(StorageError::Conflict { .. }) => {
                    warn!(admin_id = %admin_id, "Global override changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CashbackError::Conflict(
            "global override kept changing during update".to_string(),
        ))
    }

    // ========================================================================
    // Scheduled windows
    // ========================================================================

    pub async fn create_window(&self, new: NewWindow) -> Result<ScheduledRateWindow> {
        validate_window(&new.name, new.percentage, new.starts_at, new.ends_at)?;

        let window = ScheduledRateWindow {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            percentage: new.percentage,
            scope: new.scope,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            status: WindowStatus::Scheduled,
            created_by: new.created_by,
            activated_at: None,
            deactivated_at: None,
            created_at: Utc::now(),
        };
        self.store.create_window(window.clone()).await?;
        info!(
            window_id = %window.id,
            name = %window.name,
            percentage = %window.percentage,
            starts_at = %window.starts_at,
            ends_at = %window.ends_at,
            "Rate window scheduled"
        );
        Ok(window)
    }

    pub async fn list_windows(&self, status: Option<WindowStatus>) -> Result<Vec<ScheduledRateWindow>> {
        Ok(self.store.list_windows(status).await?)
    }

    /// Edit a window that has not started yet.
    pub async fn update_window(&self, id: Uuid, update: WindowUpdate) -> Result<ScheduledRateWindow> {
        validate_window(&update.name, update.percentage, update.starts_at, update.ends_at)?;

        let mut window = self
            .store
            .get_window(id)
            .await?
            .ok_or_else(|| not_found("rate window", id))?;
        if window.status != WindowStatus::Scheduled {
            return Err(CashbackError::Validation(format!(
                "only scheduled windows can be edited, window is {}",
                window.status.as_str()
            )));
        }

        window.name = update.name;
        window.description = update.description;
        window.percentage = update.percentage;
        window.scope = update.scope;
        window.starts_at = update.starts_at;
        window.ends_at = update.ends_at;

        if !self.store.update_window(window.clone()).await? {
            return Err(CashbackError::Conflict(format!("window {id} left scheduled during edit")));
        }
        info!(window_id = %id, "Rate window updated");
        Ok(window)
    }

    /// Cancel a scheduled window, or end an active one early.
    pub async fn cancel_window(&self, id: Uuid) -> Result<ScheduledRateWindow> {
        let window = self
            .store
            .get_window(id)
            .await?
            .ok_or_else(|| not_found("rate window", id))?;
        if !window.status.can_transition_to(WindowStatus::Cancelled) {
            return Err(CashbackError::Validation(format!(
                "window is already {}",
                window.status.as_str()
            )));
        }

        let applied = self
            .store
            .transition_window(id, window.status, WindowStatus::Cancelled, Utc::now())
            .await?;
        if !applied {
            return Err(CashbackError::Conflict(format!("window {id} changed status during cancel")));
        }
        info!(window_id = %id, from = window.status.as_str(), "Rate window cancelled");

        self.store
            .get_window(id)
            .await?
            .ok_or_else(|| not_found("rate window", id))
    }

    // ========================================================================
    // Tiers and house edges
    // ========================================================================

    /// Add a tier. Thresholds must strictly increase with level.
    pub async fn create_tier(&self, tier: Tier) -> Result<Tier> {
        if self.store.get_tier_by_level(tier.level).await?.is_some() {
            return Err(CashbackError::Validation(format!(
                "a tier with level {} already exists",
                tier.level
            )));
        }
        self.validate_tier(&tier).await?;
        self.store.put_tier(tier.clone()).await?;
        info!(tier_id = %tier.id, level = tier.level, name = %tier.name, "Tier created");
        Ok(tier)
    }

    pub async fn update_tier(&self, tier: Tier) -> Result<Tier> {
        let existing = self
            .store
            .get_tier(tier.id)
            .await?
            .ok_or_else(|| not_found("tier", tier.id))?;
        if existing.level != tier.level {
            if let Some(other) = self.store.get_tier_by_level(tier.level).await? {
                if other.id != tier.id {
                    return Err(CashbackError::Validation(format!(
                        "a tier with level {} already exists",
                        tier.level
                    )));
                }
            }
        }
        self.validate_tier(&tier).await?;
        self.store.put_tier(tier.clone()).await?;
        info!(tier_id = %tier.id, level = tier.level, name = %tier.name, "Tier updated");
        Ok(tier)
    }

    pub async fn list_tiers(&self, active_only: bool) -> Result<Vec<Tier>> {
        Ok(self.store.list_tiers(active_only).await?)
    }

    async fn validate_tier(&self, tier: &Tier) -> Result<()> {
        if tier.name.trim().is_empty() {
            return Err(CashbackError::Validation("tier name must not be empty".to_string()));
        }
        if tier.threshold < Decimal::ZERO {
            return Err(CashbackError::Validation("tier threshold must not be negative".to_string()));
        }
        validate_percentage("tier cashback", tier.cashback_percentage)?;
        for cap in [tier.daily_cap, tier.weekly_cap, tier.monthly_cap].into_iter().flatten() {
            if cap < Decimal::ZERO {
                return Err(CashbackError::Validation("tier caps must not be negative".to_string()));
            }
        }

        for other in self.store.list_tiers(false).await? {
            if other.id == tier.id {
                continue;
            }
            let ordered = if other.level < tier.level {
                other.threshold < tier.threshold
            } else {
                other.threshold > tier.threshold
            };
            if !ordered {
                return Err(CashbackError::Validation(format!(
                    "threshold {} for level {} breaks ordering against level {} ({})",
                    tier.threshold, tier.level, other.level, other.threshold
                )));
            }
        }
        Ok(())
    }

    pub async fn set_house_edge(&self, edge: HouseEdge) -> Result<HouseEdge> {
        if edge.game_type.trim().is_empty() {
            return Err(CashbackError::Validation("game type must not be empty".to_string()));
        }
        if edge.edge < Decimal::ZERO || edge.edge > Decimal::ONE {
            return Err(CashbackError::Validation(format!(
                "house edge must be within [0, 1], got {}",
                edge.edge
            )));
        }
        self.store.put_house_edge(edge.clone()).await?;
        info!(
            game_type = %edge.game_type,
            game_variant = ?edge.game_variant,
            edge = %edge.edge,
            active = edge.active,
            "House edge set"
        );
        Ok(edge)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Pin the user's effective tier to `level`, or with `None` let it follow
    /// the earned tier again.
    pub async fn set_effective_tier_override(
        &self,
        user_id: Uuid,
        level: Option<u32>,
    ) -> Result<UserTierState> {
        let state = self.progression.load_or_bootstrap(user_id).await?;
        match level {
            Some(level) => {
                let tier = self
                    .store
                    .get_tier_by_level(level)
                    .await?
                    .ok_or_else(|| not_found("tier", format!("level {level}")))?;
                self.store.set_effective_tier(user_id, tier.id, tier.level, true).await?;
                info!(user_id = %user_id, level, "Effective tier pinned");
            }
            None => {
                self.store
                    .set_effective_tier(user_id, state.current_tier_id, state.current_level, false)
                    .await?;
                info!(user_id = %user_id, level = state.current_level, "Effective tier override cleared");
            }
        }
        self.store
            .get_user_state(user_id)
            .await?
            .ok_or_else(|| not_found("user tier state", user_id))
    }

    /// Grant cashback outside of wagering.
    pub async fn create_manual_earning(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> Result<Earning> {
        if amount <= Decimal::ZERO {
            return Err(CashbackError::Validation(format!(
                "manual earning must be positive, got {amount}"
            )));
        }
        if reason.trim().is_empty() {
            return Err(CashbackError::Validation("manual earning needs a reason".to_string()));
        }
        let amount = round_money(amount);

        let state = self.progression.load_or_bootstrap(user_id).await?;
        let tier_id = self
            .effective_tier(&state)
            .await?
            .map_or(state.current_tier_id, |t| t.id);
        let now = Utc::now();
        let earning = Earning {
            id: Uuid::new_v4(),
            user_id,
            tier_id,
            source_wager: None,
            kind: EarningKind::Manual,
            rate: Decimal::ZERO,
            source: RateSource::Manual,
            revenue_metric: Decimal::ZERO,
            earned: amount,
            claimed: Decimal::ZERO,
            available: amount,
            status: EarningStatus::Available,
            expires_at: now + self.settings.earning_ttl,
            version: 0,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        };
        let payload = OperationPayload::ManualEarning(ManualEarningPayload {
            earning: earning.clone(),
            reason: reason.to_string(),
        });

        let store = self.store.as_ref();
        let prepared = &earning;
        self.retry
            .run_with_retry(user_id, payload, move || {
                super::record_earning(store, prepared, MetricDelta::default())
            })
            .await?;

        info!(user_id = %user_id, earning_id = %earning.id, amount = %amount, reason, "Manual earning created");
        self.notify(
            user_id,
            Notification::EarningCredited {
                earning_id: earning.id,
                amount,
                source: RateSource::Manual,
            },
        );
        Ok(earning)
    }

    /// Mark available earnings past expiry as expired.
    pub async fn expire_earnings(&self) -> Result<u64> {
        let count = self.store.expire_earnings(Utc::now()).await?;
        if count > 0 {
            info!(expired = count, "Expired unclaimed earnings");
        }
        Ok(count)
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    pub async fn cashback_summary(&self, user_id: Uuid) -> Result<CashbackSummary> {
        let state = self.progression.load_or_bootstrap(user_id).await?;
        let current_tier = self.store.get_tier(state.current_tier_id).await?;
        let effective_tier = self.effective_tier(&state).await?;
        let now = Utc::now();

        let earnings = self.store.earnings_for_user(user_id).await?;
        let total_earned = earnings.iter().map(|e| e.earned).sum();
        let total_claimed = earnings.iter().map(|e| e.claimed).sum();
        let available = earnings
            .iter()
            .filter(|e| e.is_claimable(now))
            .map(|e| e.available)
            .sum();

        let global_override = self.store.get_override().await?;

        Ok(CashbackSummary {
            user_id,
            current_tier,
            effective_tier,
            progress: state.progress,
            cumulative_revenue: state.cumulative_revenue,
            total_earned,
            total_claimed,
            available,
            global_override_active: global_override.enabled,
            override_percentage: global_override.enabled.then_some(global_override.percentage),
        })
    }

    pub async fn earnings_for_user(&self, user_id: Uuid) -> Result<Vec<Earning>> {
        Ok(self.store.earnings_for_user(user_id).await?)
    }

    pub async fn claims_for_user(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        Ok(self.store.claims_for_user(user_id).await?)
    }

    /// Claims credited to a balance whose record never reached the store.
    pub async fn unrecorded_claims(&self) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self
            .unrecorded_claims
            .lock()
            .await
            .values()
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.created_at);
        claims
    }

    /// Persist an unrecorded claim. It keeps counting toward caps until the
    /// store accepts it.
    pub async fn record_unrecorded_claim(&self, claim_id: Uuid) -> Result<Claim> {
        let mut claim = self
            .unrecorded_claims
            .lock()
            .await
            .get(&claim_id)
            .cloned()
            .ok_or_else(|| not_found("unrecorded claim", claim_id))?;
        claim.status = ClaimStatus::Completed;
        self.store.create_claim(&claim).await?;
        self.unrecorded_claims.lock().await.remove(&claim_id);
        info!(user_id = %claim.user_id, claim_id = %claim_id, amount = %claim.amount, "Unrecorded claim reconciled");
        Ok(claim)
    }

    // ========================================================================
    // Progression
    // ========================================================================

    pub async fn check_and_progress(&self, user_id: Uuid) -> Result<UserTierState> {
        Ok(self.progression.check_and_progress(user_id).await?)
    }

    pub async fn progression_detail(&self, user_id: Uuid) -> Result<ProgressionDetail> {
        Ok(self.progression.progression_detail(user_id).await?)
    }

    pub async fn bulk_progress(&self, user_ids: &[Uuid]) -> Vec<ProgressionOutcome> {
        self.progression.bulk_progress(user_ids).await
    }

    // ========================================================================
    // Retryable operations
    // ========================================================================

    pub async fn retry_failed_operations(&self) -> Result<SweepReport> {
        Ok(self
            .retry
            .retry_failed_operations(self, self.settings.stale_operation_after)
            .await?)
    }

    pub async fn manual_retry_operation(&self, operation_id: Uuid) -> Result<()> {
        Ok(self.retry.manual_retry(operation_id, self).await?)
    }

    pub async fn failed_operations(&self) -> Result<Vec<RetryableOperation>> {
        Ok(self.retry.failed_operations().await?)
    }

    pub async fn operations_for_user(&self, user_id: Uuid) -> Result<Vec<RetryableOperation>> {
        Ok(self.retry.operations_for_user(user_id).await?)
    }
}
