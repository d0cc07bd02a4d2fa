//! OperationStore interface tests.

use chrono::Duration;
use uuid::Uuid;

use rakeback::model::{OperationKind, OperationStatus, RetryableOperation};
use rakeback::storage::OperationStore;

use super::fixtures::{now, operation};

fn ids(ops: &[RetryableOperation]) -> Vec<Uuid> {
    ops.iter().map(|o| o.id).collect()
}

pub async fn test_create_and_get_operation<S: OperationStore>(store: &S) {
    let op = operation(Uuid::new_v4(), now());
    store.create_operation(&op).await.expect("create should succeed");

    let stored = store
        .get_operation(op.id)
        .await
        .unwrap()
        .expect("operation should exist");
    assert_eq!(stored, op);
    assert_eq!(stored.kind(), OperationKind::ManualEarning);

    assert!(store.get_operation(Uuid::new_v4()).await.unwrap().is_none());
}

pub async fn test_update_is_version_guarded<S: OperationStore>(store: &S) {
    let mut op = operation(Uuid::new_v4(), now());
    store.create_operation(&op).await.unwrap();

    op.status = OperationStatus::Retrying;
    op.attempts = 1;
    op.last_error = Some("storage unavailable".to_string());
    op.next_attempt_at = Some(now() + Duration::seconds(1));
    op.version = 1;
    assert!(store.update_operation(&op, 0).await.unwrap());
    assert_eq!(store.get_operation(op.id).await.unwrap(), Some(op.clone()));

    let mut stale = op.clone();
    stale.status = OperationStatus::Completed;
    stale.version = 1;
    assert!(
        !store.update_operation(&stale, 0).await.unwrap(),
        "stale version must not apply"
    );
    assert_eq!(
        store.get_operation(op.id).await.unwrap().unwrap().status,
        OperationStatus::Retrying
    );
}

pub async fn test_operations_for_user_oldest_first<S: OperationStore>(store: &S) {
    let owner = Uuid::new_v4();
    let t = now();
    let second = operation(owner, t - Duration::minutes(1));
    let first = operation(owner, t - Duration::minutes(5));
    store.create_operation(&second).await.unwrap();
    store.create_operation(&first).await.unwrap();
    store.create_operation(&operation(Uuid::new_v4(), t)).await.unwrap();

    let ops = store.operations_for_user(owner).await.unwrap();
    assert_eq!(ids(&ops), vec![first.id, second.id]);
}

pub async fn test_failed_operations_respect_next_attempt<S: OperationStore>(store: &S) {
    let t = now();
    let mut due = operation(Uuid::new_v4(), t);
    due.status = OperationStatus::Failed;
    due.next_attempt_at = Some(t - Duration::seconds(1));
    let mut unset = operation(Uuid::new_v4(), t);
    unset.status = OperationStatus::Failed;
    let mut later = operation(Uuid::new_v4(), t);
    later.status = OperationStatus::Failed;
    later.next_attempt_at = Some(t + Duration::hours(1));
    let pending = operation(Uuid::new_v4(), t);
    for op in [&due, &unset, &later, &pending] {
        store.create_operation(op).await.unwrap();
    }

    let failed = ids(&store.failed_operations(t).await.unwrap());
    assert!(failed.contains(&due.id));
    assert!(failed.contains(&unset.id));
    assert!(!failed.contains(&later.id));
    assert!(!failed.contains(&pending.id));
}

pub async fn test_stale_operations<S: OperationStore>(store: &S) {
    let t = now();
    let old = t - Duration::hours(1);
    let stuck_pending = operation(Uuid::new_v4(), old);
    let mut stuck_retrying = operation(Uuid::new_v4(), old);
    stuck_retrying.status = OperationStatus::Retrying;
    let mut old_completed = operation(Uuid::new_v4(), old);
    old_completed.status = OperationStatus::Completed;
    let mut old_failed = operation(Uuid::new_v4(), old);
    old_failed.status = OperationStatus::Failed;
    let fresh = operation(Uuid::new_v4(), t);
    for op in [&stuck_pending, &stuck_retrying, &old_completed, &old_failed, &fresh] {
        store.create_operation(op).await.unwrap();
    }

    let stale = ids(&store.stale_operations(t - Duration::minutes(10)).await.unwrap());
    assert!(stale.contains(&stuck_pending.id));
    assert!(stale.contains(&stuck_retrying.id));
    assert!(!stale.contains(&old_completed.id));
    assert!(!stale.contains(&old_failed.id));
    assert!(!stale.contains(&fresh.id));
}

/// Run all OperationStore tests against a store.
#[macro_export]
macro_rules! run_operation_store_tests {
    ($store:expr) => {
        use $crate::storage::operation_store_tests::*;

        test_create_and_get_operation($store).await;
        println!("  test_create_and_get_operation: PASSED");

        test_update_is_version_guarded($store).await;
        println!("  test_update_is_version_guarded: PASSED");

        test_operations_for_user_oldest_first($store).await;
        println!("  test_operations_for_user_oldest_first: PASSED");

        test_failed_operations_respect_next_attempt($store).await;
        println!("  test_failed_operations_respect_next_attempt: PASSED");

        test_stale_operations($store).await;
        println!("  test_stale_operations: PASSED");
    };
}
