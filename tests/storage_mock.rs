//! In-memory storage contract tests.
//!
//! Run with: cargo test --test storage_mock

mod storage;

use rakeback::storage::MockStore;

#[tokio::test]
async fn test_mock_tier_store() {
    println!("=== Mock TierStore Tests ===");
    let store = MockStore::new();
    run_tier_store_tests!(&store);
    println!("=== All Mock TierStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_user_state_store() {
    println!("=== Mock UserStateStore Tests ===");
    let store = MockStore::new();
    run_user_state_tests!(&store);
    println!("=== All Mock UserStateStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_rate_store() {
    println!("=== Mock Override/ScheduleStore Tests ===");
    let store = MockStore::new();
    run_rate_store_tests!(&store);
    println!("=== All Mock Override/ScheduleStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_earning_store() {
    println!("=== Mock Earning/ClaimStore Tests ===");
    let store = MockStore::new();
    run_earning_store_tests!(&store);
    println!("=== All Mock Earning/ClaimStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_operation_store() {
    println!("=== Mock OperationStore Tests ===");
    let store = MockStore::new();
    run_operation_store_tests!(&store);
    println!("=== All Mock OperationStore tests PASSED ===");
}
