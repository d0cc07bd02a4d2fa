use chrono::Duration as ChronoDuration;
use rust_decimal_macros::dec;
use uuid::Uuid;

use super::*;
use crate::model::{ScheduledRateWindow, WindowScope};
use crate::storage::MockStore;

fn window(starts_in_mins: i64, ends_in_mins: i64) -> ScheduledRateWindow {
    let now = Utc::now();
    ScheduledRateWindow {
        id: Uuid::new_v4(),
        name: "weekend boost".to_string(),
        description: None,
        percentage: dec!(25),
        scope: WindowScope::Global,
        starts_at: now + ChronoDuration::minutes(starts_in_mins),
        ends_at: now + ChronoDuration::minutes(ends_in_mins),
        status: WindowStatus::Scheduled,
        created_by: None,
        activated_at: None,
        deactivated_at: None,
        created_at: now,
    }
}

async fn manager_with(windows: &[ScheduledRateWindow]) -> (Arc<MockStore>, ScheduleManager) {
    let store = Arc::new(MockStore::new());
    for w in windows {
        store.create_window(w.clone()).await.unwrap();
    }
    let manager = ScheduleManager::new(store.clone());
    (store, manager)
}

#[tokio::test]
async fn test_activates_started_windows_only() {
    let started = window(-5, 60);
    let future = window(30, 90);
    let (store, manager) = manager_with(&[started.clone(), future.clone()]).await;

    let report = manager.process_schedules().await.unwrap();
    assert_eq!(report, TickReport { activated: 1, completed: 0 });

    let started = store.get_window(started.id).await.unwrap().unwrap();
    assert_eq!(started.status, WindowStatus::Active);
    assert!(started.activated_at.is_some());

    let future = store.get_window(future.id).await.unwrap().unwrap();
    assert_eq!(future.status, WindowStatus::Scheduled);
}

#[tokio::test]
async fn test_completes_ended_windows() {
    let w = window(-5, 10);
    let (store, manager) = manager_with(&[w.clone()]).await;

    manager.process_schedules().await.unwrap();
    let later = Utc::now() + ChronoDuration::minutes(15);
    let report = manager.process_schedules_at(later).await.unwrap();
    assert_eq!(report, TickReport { activated: 0, completed: 1 });

    let stored = store.get_window(w.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WindowStatus::Completed);
    assert!(stored.deactivated_at.is_some());
}

#[tokio::test]
async fn test_window_missed_entirely_is_activated_and_completed_in_one_tick() {
    let w = window(-60, -30);
    let (store, manager) = manager_with(&[w.clone()]).await;

    let report = manager.process_schedules().await.unwrap();
    assert_eq!(report, TickReport { activated: 1, completed: 1 });

    let stored = store.get_window(w.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WindowStatus::Completed);
    assert!(stored.activated_at.is_some());
    assert!(stored.deactivated_at.is_some());
}

#[tokio::test]
async fn test_cancelled_window_is_never_activated() {
    let w = window(-5, 60);
    let (store, manager) = manager_with(&[w.clone()]).await;
    store
        .transition_window(w.id, WindowStatus::Scheduled, WindowStatus::Cancelled, Utc::now())
        .await
        .unwrap();

    let report = manager.process_schedules().await.unwrap();
    assert_eq!(report, TickReport::default());
    let stored = store.get_window(w.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WindowStatus::Cancelled);
}

#[tokio::test]
async fn test_concurrent_ticks_activate_exactly_once() {
    let windows: Vec<_> = (0..5).map(|_| window(-1, 60)).collect();
    let (_store, manager) = manager_with(&windows).await;
    let manager = Arc::new(manager);

    let ticks = (0..8).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.process_schedules().await.unwrap() })
    });
    let reports = futures::future::join_all(ticks).await;

    let activated: usize = reports.into_iter().map(|r| r.unwrap().activated).sum();
    assert_eq!(activated, 5);
}

#[tokio::test]
async fn test_repeated_ticks_are_idempotent() {
    let w = window(-5, 60);
    let (_store, manager) = manager_with(&[w]).await;

    assert_eq!(manager.process_schedules().await.unwrap().activated, 1);
    assert_eq!(manager.process_schedules().await.unwrap(), TickReport::default());
}

#[tokio::test]
async fn test_start_runs_first_tick_immediately_and_stops() {
    let w = window(-5, 60);
    let (store, manager) = manager_with(&[w.clone()]).await;
    let manager = Arc::new(manager.with_interval(Duration::from_secs(3600)));

    let handle = manager.start();

    let mut activated = false;
    for _ in 0..50 {
        let stored = store.get_window(w.id).await.unwrap().unwrap();
        if stored.status == WindowStatus::Active {
            activated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(activated);

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .unwrap();
}
