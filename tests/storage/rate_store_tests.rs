//! OverrideStore and ScheduleStore interface tests.

use chrono::Duration;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rakeback::model::{ScheduledRateWindow, WindowScope, WindowStatus};
use rakeback::storage::{OverrideStore, ScheduleStore, StorageError};

use super::fixtures::{now, window};

fn ids(windows: &[ScheduledRateWindow]) -> Vec<Uuid> {
    windows.iter().map(|w| w.id).collect()
}

// =============================================================================
// OverrideStore tests
// =============================================================================

pub async fn test_override_compare_and_swap<S: OverrideStore>(store: &S) {
    let current = store.get_override().await.unwrap();
    let admin = Uuid::new_v4();
    let at = now();

    let mut next = current.clone();
    next.enabled = true;
    next.percentage = dec!(100);
    next.enabled_by = Some(admin);
    next.enabled_at = Some(at);

    let stored = store.swap_override(next, current.version).await.unwrap();
    assert_eq!(stored.version, current.version + 1);

    let read = store.get_override().await.unwrap();
    assert_eq!(read, stored);
    assert!(read.enabled);
    assert_eq!(read.percentage, dec!(100));
    assert_eq!(read.enabled_by, Some(admin));

    let mut stale = read.clone();
    stale.enabled = false;
    assert!(matches!(
        store.swap_override(stale, current.version).await,
        Err(StorageError::Conflict { .. })
    ));
    assert!(store.get_override().await.unwrap().enabled, "stale swap must not apply");
}

// =============================================================================
// ScheduleStore tests
// =============================================================================

pub async fn test_create_and_get_window<S: ScheduleStore>(store: &S) {
    let t = now();
    let mut w = window(t + Duration::hours(1), t + Duration::hours(2));
    w.scope = WindowScope::GameId("test_plinko_v2".to_string());
    store.create_window(w.clone()).await.expect("create should succeed");

    assert_eq!(store.get_window(w.id).await.unwrap(), Some(w.clone()));
    assert!(store.get_window(Uuid::new_v4()).await.unwrap().is_none());
    assert!(
        store.create_window(w).await.is_err(),
        "duplicate id must be rejected"
    );
}

pub async fn test_transition_is_conditional<S: ScheduleStore>(store: &S) {
    let t = now();
    let w = window(t - Duration::minutes(5), t + Duration::hours(1));
    store.create_window(w.clone()).await.unwrap();

    assert!(store
        .transition_window(w.id, WindowStatus::Scheduled, WindowStatus::Active, t)
        .await
        .unwrap());
    assert!(
        !store
            .transition_window(w.id, WindowStatus::Scheduled, WindowStatus::Active, t)
            .await
            .unwrap(),
        "second activation must not apply"
    );

    let stored = store.get_window(w.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WindowStatus::Active);
    assert_eq!(stored.activated_at, Some(t));
    assert_eq!(stored.deactivated_at, None);

    let later = t + Duration::hours(2);
    assert!(store
        .transition_window(w.id, WindowStatus::Active, WindowStatus::Completed, later)
        .await
        .unwrap());
    let stored = store.get_window(w.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WindowStatus::Completed);
    assert_eq!(stored.deactivated_at, Some(later));
}

pub async fn test_update_only_while_scheduled<S: ScheduleStore>(store: &S) {
    let t = now();
    let w = window(t + Duration::hours(1), t + Duration::hours(3));
    store.create_window(w.clone()).await.unwrap();

    let mut edited = w.clone();
    edited.percentage = dec!(40);
    edited.name = "test_window_edited".to_string();
    assert!(store.update_window(edited.clone()).await.unwrap());
    assert_eq!(store.get_window(w.id).await.unwrap(), Some(edited.clone()));

    store
        .transition_window(w.id, WindowStatus::Scheduled, WindowStatus::Cancelled, t)
        .await
        .unwrap();
    let mut late = edited.clone();
    late.percentage = dec!(90);
    assert!(!store.update_window(late).await.unwrap());
    assert_eq!(
        store.get_window(w.id).await.unwrap().unwrap().percentage,
        dec!(40)
    );
}

pub async fn test_due_window_queries<S: ScheduleStore>(store: &S) {
    let t = now();
    let started = window(t - Duration::hours(1), t + Duration::hours(1));
    let future = window(t + Duration::hours(1), t + Duration::hours(2));
    store.create_window(started.clone()).await.unwrap();
    store.create_window(future.clone()).await.unwrap();

    let due = ids(&store.windows_to_activate(t).await.unwrap());
    assert!(due.contains(&started.id));
    assert!(!due.contains(&future.id));
    assert!(!ids(&store.live_windows(t).await.unwrap()).contains(&started.id));

    store
        .transition_window(started.id, WindowStatus::Scheduled, WindowStatus::Active, t)
        .await
        .unwrap();

    assert!(!ids(&store.windows_to_activate(t).await.unwrap()).contains(&started.id));
    assert!(ids(&store.live_windows(t).await.unwrap()).contains(&started.id));
    assert!(!ids(&store.windows_to_deactivate(t).await.unwrap()).contains(&started.id));

    let after = t + Duration::hours(1);
    assert!(
        ids(&store.windows_to_deactivate(after).await.unwrap()).contains(&started.id),
        "window ending exactly now is due"
    );
    assert!(
        !ids(&store.live_windows(after).await.unwrap()).contains(&started.id),
        "end is exclusive"
    );
}

pub async fn test_list_windows_by_status<S: ScheduleStore>(store: &S) {
    let t = now();
    let a = window(t + Duration::hours(5), t + Duration::hours(6));
    let b = window(t + Duration::hours(4), t + Duration::hours(6));
    store.create_window(a.clone()).await.unwrap();
    store.create_window(b.clone()).await.unwrap();
    store
        .transition_window(a.id, WindowStatus::Scheduled, WindowStatus::Cancelled, t)
        .await
        .unwrap();

    let scheduled = ids(&store.list_windows(Some(WindowStatus::Scheduled)).await.unwrap());
    assert!(scheduled.contains(&b.id));
    assert!(!scheduled.contains(&a.id));

    let all: Vec<Uuid> = ids(&store.list_windows(None).await.unwrap())
        .into_iter()
        .filter(|id| *id == a.id || *id == b.id)
        .collect();
    assert_eq!(all, vec![b.id, a.id], "ordered by start time");
}

/// Run all OverrideStore and ScheduleStore tests against a store.
#[macro_export]
macro_rules! run_rate_store_tests {
    ($store:expr) => {
        use $crate::storage::rate_store_tests::*;

        test_override_compare_and_swap($store).await;
        println!("  test_override_compare_and_swap: PASSED");

        test_create_and_get_window($store).await;
        println!("  test_create_and_get_window: PASSED");

        test_transition_is_conditional($store).await;
        println!("  test_transition_is_conditional: PASSED");

        test_update_only_while_scheduled($store).await;
        println!("  test_update_only_while_scheduled: PASSED");

        test_due_window_queries($store).await;
        println!("  test_due_window_queries: PASSED");

        test_list_windows_by_status($store).await;
        println!("  test_list_windows_by_status: PASSED");
    };
}
