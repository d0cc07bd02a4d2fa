//! UserStateStore interface tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rakeback::model::UserTierState;
use rakeback::storage::{EarningStore, MetricDelta, ProgressUpdate, StorageError, UserStateStore};

use super::fixtures::{earning, now, seed_user, tier};

fn promotion(user_id: Uuid, level: u32, progress: Decimal) -> ProgressUpdate {
    let at = now();
    ProgressUpdate {
        user_id,
        current_tier_id: Uuid::new_v4(),
        current_level: level,
        progress,
        observed_revenue: Decimal::ZERO,
        promoted_at: Some(at),
        at,
    }
}

pub async fn test_get_missing_user<S: UserStateStore>(store: &S) {
    assert!(store.get_user_state(Uuid::new_v4()).await.unwrap().is_none());
}

pub async fn test_create_is_insert_if_absent<S: UserStateStore>(store: &S) {
    let user_id = Uuid::new_v4();
    let first = UserTierState::bootstrap(user_id, &tier(1, Decimal::ZERO), now());
    let stored = store.create_user_state(first.clone()).await.unwrap();
    assert_eq!(stored, first);

    let mut second = UserTierState::bootstrap(user_id, &tier(2, dec!(10)), now());
    second.cumulative_revenue = dec!(999);
    let stored = store.create_user_state(second).await.unwrap();
    assert_eq!(stored, first, "existing row should win");

    assert_eq!(store.get_user_state(user_id).await.unwrap(), Some(first));
}

pub async fn test_progress_moves_up_and_effective_follows<S: UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let update = promotion(user_id, 2, dec!(0.25));

    assert!(store.record_progress(update.clone()).await.unwrap());

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.current_level, 2);
    assert_eq!(state.current_tier_id, update.current_tier_id);
    assert_eq!(state.effective_level, 2);
    assert_eq!(state.effective_tier_id, update.current_tier_id);
    assert_eq!(state.progress, dec!(0.25));
    assert_eq!(state.last_promoted_at, update.promoted_at);
}

pub async fn test_progress_never_lowers_level<S: UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    assert!(store.record_progress(promotion(user_id, 3, dec!(0.5))).await.unwrap());

    let applied = store
        .record_progress(promotion(user_id, 2, dec!(0.9)))
        .await
        .unwrap();
    assert!(!applied, "lower level must be rejected");

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.current_level, 3);
    assert_eq!(state.progress, dec!(0.5));
}

pub async fn test_same_level_progress_keeps_promotion_time<S: UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let promoted = promotion(user_id, 2, dec!(0.1));
    store.record_progress(promoted.clone()).await.unwrap();

    let mut progress_only = promotion(user_id, 2, dec!(0.6));
    progress_only.current_tier_id = promoted.current_tier_id;
    progress_only.promoted_at = None;
    assert!(store.record_progress(progress_only).await.unwrap());

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.progress, dec!(0.6));
    assert_eq!(state.last_promoted_at, promoted.promoted_at);
}

pub async fn test_pinned_effective_tier_survives_progress<S: UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let pinned = Uuid::new_v4();
    store.set_effective_tier(user_id, pinned, 5, true).await.unwrap();

    store.record_progress(promotion(user_id, 2, dec!(0))).await.unwrap();

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.current_level, 2);
    assert_eq!(state.effective_tier_id, pinned);
    assert_eq!(state.effective_level, 5);
    assert!(state.effective_overridden);

    store
        .set_effective_tier(user_id, state.current_tier_id, 2, false)
        .await
        .unwrap();
    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.effective_level, 2);
    assert!(!state.effective_overridden);
}

pub async fn test_progress_rejected_after_revenue_moves<S: UserStateStore + EarningStore>(
    store: &S,
) {
    let user_id = seed_user(store).await;
    let e = earning(user_id, dec!(1.00), now());
    let delta = MetricDelta {
        revenue: dec!(40),
        ..Default::default()
    };
    assert!(store.record_earning(&e, delta).await.unwrap());

    let stale = promotion(user_id, 1, dec!(0.1));
    assert!(!store.record_progress(stale).await.unwrap());
    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.progress, Decimal::ZERO);

    let mut fresh = promotion(user_id, 1, dec!(0.4));
    fresh.observed_revenue = state.cumulative_revenue;
    assert!(store.record_progress(fresh).await.unwrap());
    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.progress, dec!(0.4));
}

pub async fn test_updates_on_missing_user<S: UserStateStore>(store: &S) {
    let ghost = Uuid::new_v4();
    assert!(matches!(
        store.record_progress(promotion(ghost, 2, dec!(0))).await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        store.set_effective_tier(ghost, Uuid::new_v4(), 1, true).await,
        Err(StorageError::NotFound { .. })
    ));
}

/// Run all UserStateStore tests against a store.
#[macro_export]
macro_rules! run_user_state_tests {
    ($store:expr) => {
        use $crate::storage::user_state_tests::*;

        test_get_missing_user($store).await;
        println!("  test_get_missing_user: PASSED");

        test_create_is_insert_if_absent($store).await;
        println!("  test_create_is_insert_if_absent: PASSED");

        test_progress_moves_up_and_effective_follows($store).await;
        println!("  test_progress_moves_up_and_effective_follows: PASSED");

        test_progress_never_lowers_level($store).await;
        println!("  test_progress_never_lowers_level: PASSED");

        test_same_level_progress_keeps_promotion_time($store).await;
        println!("  test_same_level_progress_keeps_promotion_time: PASSED");

        test_pinned_effective_tier_survives_progress($store).await;
        println!("  test_pinned_effective_tier_survives_progress: PASSED");

        test_progress_rejected_after_revenue_moves($store).await;
        println!("  test_progress_rejected_after_revenue_moves: PASSED");

        test_updates_on_missing_user($store).await;
        println!("  test_updates_on_missing_user: PASSED");
    };
}
