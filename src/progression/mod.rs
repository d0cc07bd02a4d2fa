//! Tier progression.
//!
//! A user's earned tier is the highest active tier whose threshold is at or
//! below their cumulative revenue metric. Progression only moves upward; the
//! store refuses any update that would lower the recorded level.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Tier, UserTierState};
use crate::notify::{Notification, NotificationChannel};
use crate::storage::{CashbackStore, ProgressUpdate, StorageError};


/// Compute-and-write passes before progression gives up on a busy user.
const PROGRESS_ATTEMPTS: u32 = 3;

/// Decimal places kept for the progress ratio.
pub const PROGRESS_SCALE: u32 = 4;

/// `(cumulative - current_min) / (next_min - current_min)` clamped to
/// [0, 1]. At the top tier (`next_min` is `None`) progress is 1.
pub fn progress_ratio(cumulative: Decimal, current_min: Decimal, next_min: Option<Decimal>) -> Decimal {
    let Some(next_min) = next_min else {
        return Decimal::ONE;
    };
    let span = next_min - current_min;
    if span <= Decimal::ZERO {
        return Decimal::ONE;
    }
    ((cumulative - current_min) / span)
        .clamp(Decimal::ZERO, Decimal::ONE)
        .round_dp(PROGRESS_SCALE)
}

/// Read-only view of where a user stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressionDetail {
    pub user_id: Uuid,
    pub current_tier: Tier,
    pub next_tier: Option<Tier>,
    pub cumulative_revenue: Decimal,
    pub progress_to_next: Decimal,
    /// Revenue metric still needed to reach the next tier; zero at the top.
    pub remaining_to_next: Decimal,
    pub last_promoted_at: Option<DateTime<Utc>>,
}

/// Per-user outcome of [`ProgressionTracker::bulk_progress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressionOutcome {
    pub user_id: Uuid,
    pub previous_level: Option<u32>,
    pub current_level: Option<u32>,
    pub error: Option<String>,
}

impl ProgressionOutcome {
    pub fn promoted(&self) -> bool {
        matches!(
            (self.previous_level, self.current_level),
            (Some(before), Some(after)) if after > before
        )
    }
}

pub struct ProgressionTracker {
    store: Arc<dyn CashbackStore>,
    notifier: Arc<dyn NotificationChannel>,
}

impl ProgressionTracker {
    pub fn new(store: Arc<dyn CashbackStore>, notifier: Arc<dyn NotificationChannel>) -> Self {
        Self { store, notifier }
    }

    /// Load the user's state, creating it at the lowest active tier if the
    /// user has never been seen.
    pub async fn load_or_bootstrap(&self, user_id: Uuid) -> Result<UserTierState, StorageError> {
        if let Some(state) = self.store.get_user_state(user_id).await? {
            return Ok(state);
        }
        let tiers = self.active_tiers().await?;
        let lowest = lowest_tier(&tiers)?;
        let state = self
            .store
            .create_user_state(UserTierState::bootstrap(user_id, lowest, Utc::now()))
            .await?;
        info!(user_id = %user_id, level = state.current_level, "Bootstrapped user tier state");
        Ok(state)
    }

    /// Recompute the user's tier and progress, promoting if they qualify.
    ///
    /// Re-reads and recomputes when the stored state moved underneath.
    pub async fn check_and_progress(&self, user_id: Uuid) -> Result<UserTierState, StorageError> {
        let tiers = self.active_tiers().await?;
        for attempt in 1..=PROGRESS_ATTEMPTS {
            let state = self.load_or_bootstrap(user_id).await?;
            if self.progress_once(&tiers, &state).await? {
                break;
            }
            debug!(user_id = %user_id, attempt, "Progress update superseded, re-reading state");
        }

        self.store
            .get_user_state(user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "user tier state",
                id: user_id.to_string(),
            })
    }

    /// One compute-and-write pass. Returns `false` when the store refused
    /// the update.
    async fn progress_once(&self, tiers: &[Tier], state: &UserTierState) -> Result<bool, StorageError> {
        let user_id = state.user_id;
        let now = Utc::now();

        let qualifying = tiers
            .iter()
            .filter(|t| t.threshold <= state.cumulative_revenue)
            .max_by_key(|t| t.level);
        let promotion = qualifying.filter(|t| t.level > state.current_level);

        let current = match promotion {
            Some(tier) => tier,
            None => held_tier(tiers, state)?,
        };
        let next = tiers.iter().find(|t| t.level > current.level);
        let progress = progress_ratio(
            state.cumulative_revenue,
            current.threshold,
            next.map(|t| t.threshold),
        );

        if promotion.is_none() && progress == state.progress {
            debug!(user_id = %user_id, level = state.current_level, "Progression unchanged");
            return Ok(true);
        }

        let applied = self
            .store
            .record_progress(ProgressUpdate {
                user_id,
                current_tier_id: current.id,
                current_level: current.level,
                progress,
                observed_revenue: state.cumulative_revenue,
                promoted_at: promotion.map(|_| now),
                at: now,
            })
            .await?;
        if !applied {
            return Ok(false);
        }

        if let Some(tier) = promotion {
            info!(
                user_id = %user_id,
                from_level = state.current_level,
                to_level = tier.level,
                tier = %tier.name,
                cumulative_revenue = %state.cumulative_revenue,
                "User promoted"
            );
            let notification = Notification::TierPromoted {
                from_level: state.current_level,
                to_level: tier.level,
                tier_name: tier.name.clone(),
            };
            if let Err(e) = self.notifier.push(user_id, notification) {
                warn!(user_id = %user_id, error = %e, "Failed to send promotion notification");
            }
        }
        Ok(true)
    }

    /// Current tier, next tier and distance to it.
    pub async fn progression_detail(&self, user_id: Uuid) -> Result<ProgressionDetail, StorageError> {
        let tiers = self.active_tiers().await?;
        let state = self.load_or_bootstrap(user_id).await?;
        let current = held_tier(&tiers, &state)?.clone();
        let next = tiers.iter().find(|t| t.level > current.level).cloned();

        let (progress_to_next, remaining_to_next) = match &next {
            Some(next) => (
                progress_ratio(state.cumulative_revenue, current.threshold, Some(next.threshold)),
                (next.threshold - state.cumulative_revenue).max(Decimal::ZERO),
            ),
            None => (Decimal::ONE, Decimal::ZERO),
        };

        Ok(ProgressionDetail {
            user_id,
            current_tier: current,
            next_tier: next,
            cumulative_revenue: state.cumulative_revenue,
            progress_to_next,
            remaining_to_next,
            last_promoted_at: state.last_promoted_at,
        })
    }

    /// Run [`check_and_progress`](Self::check_and_progress) for each user.
    /// A failure for one user is recorded in its outcome and does not stop
    /// the batch.
    pub async fn bulk_progress(&self, user_ids: &[Uuid]) -> Vec<ProgressionOutcome> {
        let mut outcomes = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            let previous_level = match self.store.get_user_state(user_id).await {
                Ok(state) => state.map(|s| s.current_level),
                Err(e) => {
                    outcomes.push(ProgressionOutcome {
                        user_id,
                        previous_level: None,
                        current_level: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            let outcome = match self.check_and_progress(user_id).await {
                Ok(state) => ProgressionOutcome {
                    user_id,
                    previous_level,
                    current_level: Some(state.current_level),
                    error: None,
                },
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Progression failed in bulk run");
                    ProgressionOutcome {
                        user_id,
                        previous_level,
                        current_level: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        info!(
            users = outcomes.len(),
            promoted = outcomes.iter().filter(|o| o.promoted()).count(),
            failed = outcomes.iter().filter(|o| o.error.is_some()).count(),
            "Bulk progression completed"
        );
        outcomes
    }

    async fn active_tiers(&self) -> Result<Vec<Tier>, StorageError> {
        self.store.list_tiers(true).await
    }
}

fn lowest_tier(tiers: &[Tier]) -> Result<&Tier, StorageError> {
    tiers.first().ok_or_else(|| StorageError::NotFound {
        entity: "tier",
        id: "lowest active".to_string(),
    })
}

/// The tier the user currently holds. If it was deactivated, the highest
/// active tier at or below the recorded level stands in for it.
fn held_tier<'a>(tiers: &'a [Tier], state: &UserTierState) -> Result<&'a Tier, StorageError> {
    if let Some(tier) = tiers.iter().find(|t| t.id == state.current_tier_id) {
        return Ok(tier);
    }
    tiers
        .iter()
        .filter(|t| t.level <= state.current_level)
        .max_by_key(|t| t.level)
        .map_or_else(|| lowest_tier(tiers), Ok)
}
