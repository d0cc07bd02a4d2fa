//! Builders for storage test data.
//!
//! Timestamps are truncated to microseconds, the precision SQL backends keep.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rakeback::model::{
    Earning, EarningKind, EarningStatus, ManualEarningPayload, OperationPayload, RateSource,
    RetryableOperation, ScheduledRateWindow, Tier, UserTierState, WindowScope, WindowStatus,
};
use rakeback::storage::UserStateStore;

pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn tier(level: u32, threshold: Decimal) -> Tier {
    Tier {
        id: Uuid::new_v4(),
        level,
        name: format!("test_tier_{level}"),
        threshold,
        cashback_percentage: dec!(1.5),
        bonus_multiplier: dec!(1),
        daily_cap: Some(dec!(100)),
        weekly_cap: None,
        monthly_cap: Some(dec!(1000)),
        active: true,
    }
}

pub fn earning(user_id: Uuid, amount: Decimal, created_at: DateTime<Utc>) -> Earning {
    Earning {
        id: Uuid::new_v4(),
        user_id,
        tier_id: Uuid::new_v4(),
        source_wager: Some(Uuid::new_v4()),
        kind: EarningKind::Wager,
        rate: dec!(2),
        source: RateSource::HouseEdge,
        revenue_metric: amount,
        earned: amount,
        claimed: Decimal::ZERO,
        available: amount,
        status: EarningStatus::Available,
        expires_at: created_at + Duration::days(30),
        version: 0,
        created_at,
        updated_at: created_at,
        claimed_at: None,
    }
}

pub fn window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> ScheduledRateWindow {
    ScheduledRateWindow {
        id: Uuid::new_v4(),
        name: "test_window".to_string(),
        description: Some("storage contract".to_string()),
        percentage: dec!(25),
        scope: WindowScope::GameType("test_dice".to_string()),
        starts_at,
        ends_at,
        status: WindowStatus::Scheduled,
        created_by: Some(Uuid::new_v4()),
        activated_at: None,
        deactivated_at: None,
        created_at: now(),
    }
}

pub fn operation(owner: Uuid, created_at: DateTime<Utc>) -> RetryableOperation {
    let mut op = RetryableOperation::new(
        owner,
        OperationPayload::ManualEarning(ManualEarningPayload {
            earning: earning(owner, dec!(5), created_at),
            reason: "test".to_string(),
        }),
        created_at,
    );
    op.created_at = created_at;
    op.updated_at = created_at;
    op
}

/// Create a fresh user at a throwaway tier.
pub async fn seed_user<S: UserStateStore>(store: &S) -> Uuid {
    let user_id = Uuid::new_v4();
    store
        .create_user_state(UserTierState::bootstrap(
            user_id,
            &tier(1, Decimal::ZERO),
            now(),
        ))
        .await
        .expect("create_user_state should succeed");
    user_id
}
