//! EarningStore and ClaimStore interface tests.

use std::collections::BTreeMap;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rakeback::model::{Claim, ClaimStatus, Earning, EarningStatus};
use rakeback::storage::{
    Allocation, ClaimStore, EarningStore, MetricDelta, StorageError, UserStateStore,
};

use super::fixtures::{earning, now, seed_user};

fn take(e: &Earning, amount: Decimal) -> Allocation {
    Allocation {
        earning_id: e.id,
        amount,
        expected_version: e.version,
    }
}

// =============================================================================
// EarningStore::record_earning tests
// =============================================================================

pub async fn test_record_earning_adds_metrics<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let e = earning(user_id, dec!(2.50), now());
    let delta = MetricDelta {
        revenue: dec!(2.50),
        wagered: dec!(125),
        payout: dec!(40),
    };

    assert!(store.record_earning(&e, delta).await.unwrap());
    assert_eq!(store.get_earning(e.id).await.unwrap(), Some(e.clone()));

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.cumulative_revenue, dec!(2.50));
    assert_eq!(state.cumulative_wagered, dec!(125));
    assert_eq!(state.cumulative_payout, dec!(40));
}

pub async fn test_record_earning_is_idempotent<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let e = earning(user_id, dec!(1.00), now());
    let delta = MetricDelta {
        revenue: dec!(1.00),
        ..Default::default()
    };

    assert!(store.record_earning(&e, delta).await.unwrap());
    assert!(
        !store.record_earning(&e, delta).await.unwrap(),
        "second insert must be a no-op"
    );

    let state = store.get_user_state(user_id).await.unwrap().unwrap();
    assert_eq!(state.cumulative_revenue, dec!(1.00), "metrics counted once");
    assert_eq!(store.earnings_for_user(user_id).await.unwrap().len(), 1);
}

pub async fn test_record_earning_for_unknown_user<S: EarningStore>(store: &S) {
    let e = earning(Uuid::new_v4(), dec!(1.00), now());
    assert!(matches!(
        store.record_earning(&e, MetricDelta::default()).await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(store.get_earning(e.id).await.unwrap().is_none());
}

// =============================================================================
// EarningStore query tests
// =============================================================================

pub async fn test_claimable_earnings_oldest_first<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let t = now();
    let newer = earning(user_id, dec!(2), t - Duration::minutes(1));
    let older = earning(user_id, dec!(3), t - Duration::minutes(10));
    let mut expired = earning(user_id, dec!(4), t - Duration::minutes(20));
    expired.expires_at = t - Duration::seconds(1);
    let mut empty = earning(user_id, dec!(1), t - Duration::minutes(30));
    empty.claimed = dec!(1);
    empty.available = Decimal::ZERO;
    empty.status = EarningStatus::Claimed;
    for e in [&newer, &older, &expired, &empty] {
        store.record_earning(e, MetricDelta::default()).await.unwrap();
    }

    let claimable: Vec<Uuid> = store
        .claimable_earnings(user_id, t)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(claimable, vec![older.id, newer.id]);

    let all: Vec<Uuid> = store
        .earnings_for_user(user_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(all, vec![empty.id, expired.id, older.id, newer.id]);
}

// =============================================================================
// EarningStore consume/release tests
// =============================================================================

pub async fn test_consume_and_release<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let t = now();
    let a = earning(user_id, dec!(3.00), t - Duration::minutes(2));
    let b = earning(user_id, dec!(4.00), t - Duration::minutes(1));
    store.record_earning(&a, MetricDelta::default()).await.unwrap();
    store.record_earning(&b, MetricDelta::default()).await.unwrap();

    let allocations = [take(&a, dec!(3.00)), take(&b, dec!(1.50))];
    store.consume_earnings(&allocations, t).await.unwrap();

    let a_now = store.get_earning(a.id).await.unwrap().unwrap();
    assert_eq!(a_now.available, Decimal::ZERO);
    assert_eq!(a_now.claimed, dec!(3.00));
    assert_eq!(a_now.status, EarningStatus::Claimed);
    assert_eq!(a_now.version, 1);
    let b_now = store.get_earning(b.id).await.unwrap().unwrap();
    assert_eq!(b_now.available, dec!(2.50));
    assert_eq!(b_now.status, EarningStatus::Available);
    assert_eq!(b_now.claimed_at, Some(t));

    store.release_earnings(&allocations, t).await.unwrap();

    let a_back = store.get_earning(a.id).await.unwrap().unwrap();
    assert_eq!(a_back.available, dec!(3.00));
    assert_eq!(a_back.status, EarningStatus::Available);
    let b_back = store.get_earning(b.id).await.unwrap().unwrap();
    assert_eq!(b_back.available, dec!(4.00));
    assert_eq!(b_back.claimed, Decimal::ZERO);
}

pub async fn test_consume_is_all_or_nothing<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let t = now();
    let a = earning(user_id, dec!(3.00), t - Duration::minutes(2));
    let b = earning(user_id, dec!(4.00), t - Duration::minutes(1));
    store.record_earning(&a, MetricDelta::default()).await.unwrap();
    store.record_earning(&b, MetricDelta::default()).await.unwrap();

    let mut stale = take(&b, dec!(1.00));
    stale.expected_version = 7;
    let result = store.consume_earnings(&[take(&a, dec!(2.00)), stale], t).await;
    assert!(matches!(result, Err(StorageError::Conflict { .. })));

    let a_now = store.get_earning(a.id).await.unwrap().unwrap();
    assert_eq!(a_now.available, dec!(3.00), "first allocation must be rolled back");
    assert_eq!(a_now.version, 0);

    let result = store.consume_earnings(&[take(&b, dec!(4.01))], t).await;
    assert!(
        matches!(result, Err(StorageError::Conflict { .. })),
        "overdraw must be rejected"
    );
}

pub async fn test_expire_earnings<S: EarningStore + UserStateStore>(store: &S) {
    let user_id = seed_user(store).await;
    let t = now();
    let mut due = earning(user_id, dec!(1), t - Duration::days(31));
    due.expires_at = t - Duration::days(1);
    let fresh = earning(user_id, dec!(1), t);
    store.record_earning(&due, MetricDelta::default()).await.unwrap();
    store.record_earning(&fresh, MetricDelta::default()).await.unwrap();

    assert!(store.expire_earnings(t).await.unwrap() >= 1);

    let due_now = store.get_earning(due.id).await.unwrap().unwrap();
    assert_eq!(due_now.status, EarningStatus::Expired);
    assert_eq!(due_now.version, 1);
    let fresh_now = store.get_earning(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh_now.status, EarningStatus::Available);

    assert_eq!(
        store.expire_earnings(t).await.unwrap(),
        0,
        "already expired earnings are not counted again"
    );
}

// =============================================================================
// ClaimStore tests
// =============================================================================

fn claim(user_id: Uuid, amount: Decimal, created_at: chrono::DateTime<chrono::Utc>) -> Claim {
    let mut consumed = BTreeMap::new();
    consumed.insert(Uuid::new_v4(), amount);
    Claim {
        id: Uuid::new_v4(),
        user_id,
        amount,
        net_amount: amount,
        fee: Decimal::ZERO,
        currency: "USD".to_string(),
        status: ClaimStatus::Completed,
        consumed,
        created_at,
    }
}

pub async fn test_claims_round_trip_newest_first<S: ClaimStore>(store: &S) {
    let user_id = Uuid::new_v4();
    let t = now();
    let old = claim(user_id, dec!(2.00), t - Duration::hours(2));
    let mut new = claim(user_id, dec!(3.00), t);
    new.status = ClaimStatus::ReconciliationRequired;
    store.create_claim(&old).await.unwrap();
    store.create_claim(&new).await.unwrap();

    let claims = store.claims_for_user(user_id).await.unwrap();
    assert_eq!(claims, vec![new, old]);
    assert!(store.claims_for_user(Uuid::new_v4()).await.unwrap().is_empty());
}

pub async fn test_claimed_since<S: ClaimStore>(store: &S) {
    let user_id = Uuid::new_v4();
    let t = now();
    store
        .create_claim(&claim(user_id, dec!(5.00), t - Duration::days(2)))
        .await
        .unwrap();
    store
        .create_claim(&claim(user_id, dec!(1.25), t - Duration::hours(1)))
        .await
        .unwrap();
    store
        .create_claim(&claim(user_id, dec!(0.75), t))
        .await
        .unwrap();

    assert_eq!(
        store.claimed_since(user_id, t - Duration::days(1)).await.unwrap(),
        dec!(2.00)
    );
    assert_eq!(store.claimed_since(user_id, t).await.unwrap(), dec!(0.75), "bound is inclusive");
    assert_eq!(
        store.claimed_since(Uuid::new_v4(), t).await.unwrap(),
        Decimal::ZERO
    );
}

/// Run all EarningStore and ClaimStore tests against a store.
#[macro_export]
macro_rules! run_earning_store_tests {
    ($store:expr) => {
        use $crate::storage::earning_store_tests::*;

        test_record_earning_adds_metrics($store).await;
        println!("  test_record_earning_adds_metrics: PASSED");

        test_record_earning_is_idempotent($store).await;
        println!("  test_record_earning_is_idempotent: PASSED");

        test_record_earning_for_unknown_user($store).await;
        println!("  test_record_earning_for_unknown_user: PASSED");

        test_claimable_earnings_oldest_first($store).await;
        println!("  test_claimable_earnings_oldest_first: PASSED");

        test_consume_and_release($store).await;
        println!("  test_consume_and_release: PASSED");

        test_consume_is_all_or_nothing($store).await;
        println!("  test_consume_is_all_or_nothing: PASSED");

        test_expire_earnings($store).await;
        println!("  test_expire_earnings: PASSED");

        test_claims_round_trip_newest_first($store).await;
        println!("  test_claims_round_trip_newest_first: PASSED");

        test_claimed_since($store).await;
        println!("  test_claimed_since: PASSED");
    };
}
