//! Cashback engine.
//!
//! Wires rate resolution, retryable persistence, tier progression and the
//! balance ledger into the two user-facing flows:
//! - `process_wager`: wager in, earning persisted, progression checked
//! - `claim_cashback`: available earnings consumed, user balance credited
//!
//! Side effects that must not fail the core flow (notifications,
//! progression after a committed wager) run as post-commit hooks and are
//! only logged when they fail.

mod admin;
pub mod maintenance;


pub use admin::{CashbackSummary, NewWindow, WindowUpdate};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::model::{
    round_money, Claim, ClaimStatus, Earning, EarningKind, EarningStatus, OperationPayload,
    ProcessWagerPayload, Tier, UserTierState, Wager,
};
use crate::notify::{Notification, NotificationChannel};
use crate::progression::ProgressionTracker;
use crate::rates::{resolve_rate, RateInputs};
use crate::retry::{OperationReplayer, RetryConfig, RetryError, RetryOrchestrator};
use crate::storage::{Allocation, CashbackStore, MetricDelta, StorageError};

/// Re-reads after a version conflict before a claim gives up.
const CLAIM_ALLOCATION_ATTEMPTS: u32 = 3;

/// Claim cap periods, all in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapPeriod {
    /// Calendar day.
    Daily,
    /// ISO week, starting Monday.
    Weekly,
    /// Calendar month.
    Monthly,
}

impl CapPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapPeriod::Daily => "daily",
            CapPeriod::Weekly => "weekly",
            CapPeriod::Monthly => "monthly",
        }
    }

    /// Start of the period containing `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let first_day = match self {
            CapPeriod::Daily => date,
            CapPeriod::Weekly => {
                let back = chrono::Days::new(u64::from(date.weekday().num_days_from_monday()));
                date.checked_sub_days(back).unwrap_or(date)
            }
            CapPeriod::Monthly => date.with_day(1).unwrap_or(date),
        };
        first_day.and_time(NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for CapPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CashbackError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{period} claim cap of {limit} exceeded: {remaining} remaining")]
    CapExceeded {
        period: CapPeriod,
        limit: Decimal,
        remaining: Decimal,
    },

    #[error("Insufficient cashback: requested {requested}, available {available}")]
    InsufficientAvailable {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, CashbackError>;

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long an earning stays claimable.
    pub earning_ttl: chrono::Duration,
    /// Currency recorded on claims.
    pub currency: String,
    /// In-flight operations untouched for this long are resumed by the
    /// retry sweep.
    pub stale_operation_after: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            earning_ttl: chrono::Duration::days(30),
            currency: "USD".to_string(),
            stale_operation_after: std::time::Duration::from_secs(600),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            earning_ttl: config.earnings.ttl(),
            currency: config.earnings.currency.clone(),
            stale_operation_after: config.maintenance.stale_after(),
        }
    }
}

pub struct CashbackEngine {
    store: Arc<dyn CashbackStore>,
    ledger: Arc<dyn BalanceLedger>,
    notifier: Arc<dyn NotificationChannel>,
    retry: RetryOrchestrator,
    progression: ProgressionTracker,
    settings: EngineSettings,
    /// One entry per user with a claim in flight.
    claim_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Credited claims whose record failed to persist, by claim id. They
    /// count toward caps until recorded.
    unrecorded_claims: Mutex<HashMap<Uuid, Claim>>,
}

impl CashbackEngine {
    pub fn new(
        store: Arc<dyn CashbackStore>,
        ledger: Arc<dyn BalanceLedger>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        let retry = RetryOrchestrator::new(store.clone().as_operation_store(), RetryConfig::default());
        let progression = ProgressionTracker::new(store.clone(), notifier.clone());
        Self {
            store,
            ledger,
            notifier,
            retry,
            progression,
            settings: EngineSettings::default(),
            claim_locks: Mutex::new(HashMap::new()),
            unrecorded_claims: Mutex::new(HashMap::new()),
        }
    }

    /// Engine configured from loaded application config.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CashbackStore>,
        ledger: Arc<dyn BalanceLedger>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self::new(store, ledger, notifier)
            .with_settings(EngineSettings::from_config(config))
            .with_retry_config(RetryConfig::from(&config.retry))
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = self.retry.with_config(config);
        self
    }

    /// Cancel in-flight retry waits once `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.retry = self.retry.with_shutdown(shutdown);
        self
    }

    pub fn store(&self) -> &Arc<dyn CashbackStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Turn a completed wager into an earning.
    ///
    /// The earning insert and the cumulative metric increments happen in one
    /// store call, retried with backoff. Notification and progression run
    /// afterwards and never fail the call.
    pub async fn process_wager(&self, wager: Wager) -> Result<Earning> {
        if wager.amount < Decimal::ZERO {
            return Err(CashbackError::Validation(format!(
                "wager amount must not be negative, got {}",
                wager.amount
            )));
        }
        if wager.payout < Decimal::ZERO {
            return Err(CashbackError::Validation(format!(
                "wager payout must not be negative, got {}",
                wager.payout
            )));
        }

        let state = self.progression.load_or_bootstrap(wager.user_id).await?;
        let tier_id = self
            .effective_tier(&state)
            .await?
            .map_or(state.current_tier_id, |t| t.id);

        let now = Utc::now();
        let global_override = self.store.get_override().await?;
        let windows = self.store.live_windows(now).await?;
        let house_edge = self
            .store
            .find_house_edge(&wager.game_type, wager.game_id.as_deref())
            .await?;
        if house_edge.is_none() {
            warn!(
                game_type = %wager.game_type,
                game_id = ?wager.game_id,
                "No house edge configured, revenue metric is zero"
            );
        }

        let decision = resolve_rate(&RateInputs {
            wager: &wager,
            house_edge: house_edge.as_ref(),
            global_override: &global_override,
            windows: &windows,
            now,
        });

        let earning = Earning {
            id: Uuid::new_v4(),
            user_id: wager.user_id,
            tier_id,
            source_wager: Some(wager.id),
            kind: EarningKind::Wager,
            rate: decision.rate,
            source: decision.source,
            revenue_metric: decision.revenue_metric,
            earned: decision.earned,
            claimed: Decimal::ZERO,
            available: decision.earned,
            status: EarningStatus::Available,
            expires_at: now + self.settings.earning_ttl,
            version: 0,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        };
        let delta = MetricDelta {
            revenue: decision.revenue_metric,
            wagered: wager.amount,
            payout: wager.payout,
        };
        let payload = OperationPayload::ProcessWagerCashback(ProcessWagerPayload {
            wager: wager.clone(),
            earning: earning.clone(),
            revenue_metric: decision.revenue_metric,
        });

        let store = self.store.as_ref();
        let prepared = &earning;
        self.retry
            .run_with_retry(wager.user_id, payload, move || {
                record_earning(store, prepared, delta)
            })
            .await?;

        info!(
            user_id = %wager.user_id,
            wager_id = %wager.id,
            earning_id = %earning.id,
            earned = %earning.earned,
            rate = %earning.rate,
            source = earning.source.as_str(),
            revenue_metric = %earning.revenue_metric,
            "Cashback earned"
        );

        self.after_earning(&earning).await;
        Ok(earning)
    }

    /// Pay out `amount` of the user's available cashback.
    pub async fn claim_cashback(&self, user_id: Uuid, amount: Decimal) -> Result<Claim> {
        if amount <= Decimal::ZERO {
            return Err(CashbackError::Validation(format!(
                "claim amount must be positive, got {amount}"
            )));
        }
        if round_money(amount) != amount {
            return Err(CashbackError::Validation(format!(
                "claim amount has more than two decimal places: {amount}"
            )));
        }

        let lock = self.claim_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.claim_locked(user_id, amount).await
        };
        self.release_claim_lock(user_id, lock).await;
        result
    }

    /// Claim body; runs while holding the user's claim lock.
    async fn claim_locked(&self, user_id: Uuid, amount: Decimal) -> Result<Claim> {
        let now = Utc::now();

        let state = self
            .store
            .get_user_state(user_id)
            .await?
            .ok_or_else(|| CashbackError::NotFound {
                entity: "user tier state",
                id: user_id.to_string(),
            })?;
        if let Some(tier) = self.effective_tier(&state).await? {
            self.check_caps(user_id, &tier, amount, now).await?;
        }

        let allocations = self.consume_oldest_first(user_id, amount, now).await?;

        let fee = Decimal::ZERO;
        let net_amount = amount - fee;
        match self.ledger.add_balance(user_id, net_amount).await {
            Ok(balance) => {
                debug!(user_id = %user_id, balance = %balance, "Ledger credited");
            }
            Err(e) => {
                warn!(user_id = %user_id, amount = %amount, error = %e, "Ledger credit failed, releasing earnings");
                if let Err(release_err) = self.store.release_earnings(&allocations, Utc::now()).await {
                    error!(
                        user_id = %user_id,
                        amount = %amount,
                        error = %release_err,
                        "Failed to release earnings after ledger failure"
                    );
                }
                return Err(e.into());
            }
        }

        let mut claim = Claim {
            id: Uuid::new_v4(),
            user_id,
            amount,
            net_amount,
            fee,
            currency: self.settings.currency.clone(),
            status: ClaimStatus::Completed,
            consumed: allocations
                .iter()
                .map(|a| (a.earning_id, a.amount))
                .collect::<BTreeMap<_, _>>(),
            created_at: now,
        };

        if let Err(e) = self.store.create_claim(&claim).await {
            claim.status = ClaimStatus::ReconciliationRequired;
            self.unrecorded_claims
                .lock()
                .await
                .insert(claim.id, claim.clone());
            error!(
                user_id = %user_id,
                claim_id = %claim.id,
                amount = %amount,
                consumed = ?claim.consumed,
                error = %e,
                "Balance credited but claim not recorded, manual reconciliation required"
            );
        } else {
            info!(
                user_id = %user_id,
                claim_id = %claim.id,
                amount = %amount,
                earnings = claim.consumed.len(),
                "Cashback claimed"
            );
        }

        self.notify(
            user_id,
            Notification::CashbackClaimed {
                claim_id: claim.id,
                amount,
                status: claim.status,
            },
        );
        Ok(claim)
    }

    /// Effective tier, falling back to the earned tier if the pinned one is
    /// gone or deactivated.
    async fn effective_tier(&self, state: &UserTierState) -> Result<Option<Tier>> {
        let pinned = match self.store.get_tier(state.effective_tier_id).await? {
            Some(tier) => Some(tier),
            None => self.store.get_tier_by_level(state.effective_level).await?,
        };
        if let Some(tier) = pinned.filter(|t| t.active) {
            return Ok(Some(tier));
        }
        if state.effective_tier_id != state.current_tier_id {
            warn!(
                user_id = %state.user_id,
                effective_tier_id = %state.effective_tier_id,
                "Effective tier missing or inactive, using earned tier"
            );
        }
        Ok(self.store.get_tier(state.current_tier_id).await?)
    }

    async fn check_caps(
        &self,
        user_id: Uuid,
        tier: &Tier,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let caps = [
            (CapPeriod::Daily, tier.daily_cap),
            (CapPeriod::Weekly, tier.weekly_cap),
            (CapPeriod::Monthly, tier.monthly_cap),
        ];
        for (period, cap) in caps {
            let Some(limit) = cap else { continue };
            let since = period.start(now);
            let claimed = self.store.claimed_since(user_id, since).await?
                + self.unrecorded_since(user_id, since).await;
            if claimed + amount > limit {
                info!(
                    user_id = %user_id,
                    period = %period,
                    limit = %limit,
                    claimed = %claimed,
                    requested = %amount,
                    "Claim rejected by cap"
                );
                return Err(CashbackError::CapExceeded {
                    period,
                    limit,
                    remaining: (limit - claimed).max(Decimal::ZERO),
                });
            }
        }
        Ok(())
    }

    /// Plan and apply an oldest-first consumption, re-planning on version
    /// conflicts.
    async fn consume_oldest_first(
        &self,
        user_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<Allocation>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let claimable = self.store.claimable_earnings(user_id, now).await?;
            let available: Decimal = claimable.iter().map(|e| e.available).sum();
            if amount > available {
                return Err(CashbackError::InsufficientAvailable {
                    requested: amount,
                    available,
                });
            }

            let allocations = allocate(&claimable, amount);
            match self.store.consume_earnings(&allocations, now).await {
                Ok(()) => return Ok(allocations),
                Err(StorageError::Conflict { entity, id }) if attempt < CLAIM_ALLOCATION_ATTEMPTS => {
                    debug!(user_id = %user_id, entity, id = %id, attempt, "Earning changed during claim, re-reading");
                }
                Err(StorageError::Conflict { entity, id }) => {
                    return Err(CashbackError::Conflict(format!(
                        "{entity} {id} kept changing during claim"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sum of unrecorded claims of `user_id` created at or after `since`.
    async fn unrecorded_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Decimal {
        self.unrecorded_claims
            .lock()
            .await
            .values()
            .filter(|c| c.user_id == user_id && c.created_at >= since)
            .map(|c| c.amount)
            .sum()
    }

    async fn claim_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.claim_locks
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .clone()
    }

    /// Drop the caller's handle and remove the entry once nobody else holds
    /// or waits on it. Clones are only handed out under the map lock.
    async fn release_claim_lock(&self, user_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.claim_locks.lock().await;
        drop(lock);
        if locks
            .get(&user_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&user_id);
        }
    }

    /// Post-commit hooks for a newly persisted earning.
    async fn after_earning(&self, earning: &Earning) {
        self.notify(
            earning.user_id,
            Notification::EarningCredited {
                earning_id: earning.id,
                amount: earning.earned,
                source: earning.source,
            },
        );
        if let Err(e) = self.progression.check_and_progress(earning.user_id).await {
            warn!(user_id = %earning.user_id, error = %e, "Progression check failed after earning");
        }
    }

    fn notify(&self, user_id: Uuid, notification: Notification) {
        if let Err(e) = self.notifier.push(user_id, notification) {
            warn!(user_id = %user_id, error = %e, "Failed to send notification");
        }
    }
}

/// Split `amount` across `earnings` in order, taking each one's full
/// available balance until the remainder fits.
fn allocate(earnings: &[Earning], amount: Decimal) -> Vec<Allocation> {
    let mut remaining = amount;
    let mut allocations = Vec::new();
    for earning in earnings {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(earning.available);
        if take <= Decimal::ZERO {
            continue;
        }
        allocations.push(Allocation {
            earning_id: earning.id,
            amount: take,
            expected_version: earning.version,
        });
        remaining -= take;
    }
    allocations
}

/// Insert `earning` and bump the owner's metrics. Inserting an earning that
/// already exists is a successful no-op.
async fn record_earning(
    store: &dyn CashbackStore,
    earning: &Earning,
    delta: MetricDelta,
) -> std::result::Result<(), StorageError> {
    if !store.record_earning(earning, delta).await? {
        debug!(earning_id = %earning.id, "Earning already recorded");
    }
    Ok(())
}

#[async_trait]
impl OperationReplayer for CashbackEngine {
    async fn replay(&self, payload: &OperationPayload) -> std::result::Result<(), StorageError> {
        match payload {
            OperationPayload::ProcessWagerCashback(p) => {
                let delta = MetricDelta {
                    revenue: p.revenue_metric,
                    wagered: p.wager.amount,
                    payout: p.wager.payout,
                };
                let inserted = self.store.record_earning(&p.earning, delta).await?;
                if inserted {
                    info!(
                        user_id = %p.earning.user_id,
                        wager_id = %p.wager.id,
                        earning_id = %p.earning.id,
                        "Replayed wager cashback"
                    );
                    self.after_earning(&p.earning).await;
                }
                Ok(())
            }
            OperationPayload::ManualEarning(p) => {
                let inserted = self
                    .store
                    .record_earning(&p.earning, MetricDelta::default())
                    .await?;
                if inserted {
                    info!(
                        user_id = %p.earning.user_id,
                        earning_id = %p.earning.id,
                        reason = %p.reason,
                        "Replayed manual earning"
                    );
                    self.notify(
                        p.earning.user_id,
                        Notification::EarningCredited {
                            earning_id: p.earning.id,
                            amount: p.earning.earned,
                            source: p.earning.source,
                        },
                    );
                }
                Ok(())
            }
        }
    }
}
