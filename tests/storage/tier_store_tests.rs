//! TierStore and HouseEdgeStore interface tests.

use rust_decimal_macros::dec;
use uuid::Uuid;

use rakeback::model::HouseEdge;
use rakeback::storage::{HouseEdgeStore, TierStore};

use super::fixtures::tier;

// =============================================================================
// TierStore tests
// =============================================================================

pub async fn test_get_missing_tier<S: TierStore>(store: &S) {
    assert!(store.get_tier(Uuid::new_v4()).await.unwrap().is_none());
    assert!(store.get_tier_by_level(9_999).await.unwrap().is_none());
}

pub async fn test_put_and_get_tier<S: TierStore>(store: &S) {
    let t = tier(101, dec!(10));
    store.put_tier(t.clone()).await.expect("put should succeed");

    let by_id = store.get_tier(t.id).await.unwrap().expect("tier should exist");
    assert_eq!(by_id, t);
    let by_level = store
        .get_tier_by_level(101)
        .await
        .unwrap()
        .expect("tier should exist by level");
    assert_eq!(by_level.id, t.id);
}

pub async fn test_put_tier_replaces_by_id<S: TierStore>(store: &S) {
    let mut t = tier(102, dec!(20));
    store.put_tier(t.clone()).await.unwrap();

    t.name = "test_renamed".to_string();
    t.weekly_cap = Some(dec!(50));
    t.active = false;
    store.put_tier(t.clone()).await.unwrap();

    let stored = store.get_tier(t.id).await.unwrap().unwrap();
    assert_eq!(stored, t, "second put should replace the first");
}

pub async fn test_list_tiers_ordered_and_filtered<S: TierStore>(store: &S) {
    let high = tier(203, dec!(300));
    let low = tier(201, dec!(100));
    let mut inactive = tier(202, dec!(200));
    inactive.active = false;
    for t in [&high, &low, &inactive] {
        store.put_tier(t.clone()).await.unwrap();
    }
    let ours = |tiers: Vec<rakeback::model::Tier>| -> Vec<u32> {
        tiers
            .into_iter()
            .filter(|t| (201..=203).contains(&t.level))
            .map(|t| t.level)
            .collect()
    };

    assert_eq!(ours(store.list_tiers(true).await.unwrap()), vec![201, 203]);
    assert_eq!(ours(store.list_tiers(false).await.unwrap()), vec![201, 202, 203]);
}

// =============================================================================
// HouseEdgeStore tests
// =============================================================================

fn edge(game_type: &str, variant: Option<&str>, value: rust_decimal::Decimal) -> HouseEdge {
    HouseEdge {
        game_type: game_type.to_string(),
        game_variant: variant.map(str::to_string),
        edge: value,
        active: true,
    }
}

pub async fn test_house_edge_exact_then_default<S: HouseEdgeStore>(store: &S) {
    let game = format!("test_slots_{}", Uuid::new_v4());
    store.put_house_edge(edge(&game, None, dec!(0.03))).await.unwrap();
    store
        .put_house_edge(edge(&game, Some("mega"), dec!(0.05)))
        .await
        .unwrap();

    let exact = store.find_house_edge(&game, Some("mega")).await.unwrap().unwrap();
    assert_eq!(exact.edge, dec!(0.05));
    assert_eq!(exact.game_variant.as_deref(), Some("mega"));

    let fallback = store.find_house_edge(&game, Some("mini")).await.unwrap().unwrap();
    assert_eq!(fallback.edge, dec!(0.03));
    assert_eq!(fallback.game_variant, None);

    let family = store.find_house_edge(&game, None).await.unwrap().unwrap();
    assert_eq!(family.edge, dec!(0.03));
}

pub async fn test_house_edge_ignores_inactive<S: HouseEdgeStore>(store: &S) {
    let game = format!("test_crash_{}", Uuid::new_v4());
    store.put_house_edge(edge(&game, None, dec!(0.01))).await.unwrap();
    let mut variant = edge(&game, Some("turbo"), dec!(0.04));
    variant.active = false;
    store.put_house_edge(variant).await.unwrap();

    let found = store.find_house_edge(&game, Some("turbo")).await.unwrap().unwrap();
    assert_eq!(found.edge, dec!(0.01), "inactive variant should fall back");

    assert!(store
        .find_house_edge("test_unknown_game", None)
        .await
        .unwrap()
        .is_none());
}

pub async fn test_put_house_edge_replaces<S: HouseEdgeStore>(store: &S) {
    let game = format!("test_plinko_{}", Uuid::new_v4());
    store.put_house_edge(edge(&game, None, dec!(0.02))).await.unwrap();
    store.put_house_edge(edge(&game, None, dec!(0.025))).await.unwrap();

    let found = store.find_house_edge(&game, None).await.unwrap().unwrap();
    assert_eq!(found.edge, dec!(0.025));
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all TierStore and HouseEdgeStore tests against a store.
#[macro_export]
macro_rules! run_tier_store_tests {
    ($store:expr) => {
        use $crate::storage::tier_store_tests::*;

        test_get_missing_tier($store).await;
        println!("  test_get_missing_tier: PASSED");

        test_put_and_get_tier($store).await;
        println!("  test_put_and_get_tier: PASSED");

        test_put_tier_replaces_by_id($store).await;
        println!("  test_put_tier_replaces_by_id: PASSED");

        test_list_tiers_ordered_and_filtered($store).await;
        println!("  test_list_tiers_ordered_and_filtered: PASSED");

        test_house_edge_exact_then_default($store).await;
        println!("  test_house_edge_exact_then_default: PASSED");

        test_house_edge_ignores_inactive($store).await;
        println!("  test_house_edge_ignores_inactive: PASSED");

        test_put_house_edge_replaces($store).await;
        println!("  test_put_house_edge_replaces: PASSED");
    };
}
