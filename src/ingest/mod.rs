//! Wager feed.
//!
//! Consumes JSON-encoded wager events from an in-process channel and runs
//! each completed wager through [`CashbackEngine::process_wager`]. Events
//! other than `bet_completed` are acknowledged and skipped.
//!
//! De-duplicating redelivered events is the producer's responsibility.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::CashbackEngine;
use crate::model::Wager;

/// The only event type that earns cashback.
pub const BET_COMPLETED: &str = "bet_completed";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Malformed wager event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Wire format of a wager event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerEvent {
    /// `bet_completed`, `bet_won`, `bet_lost`, ...
    pub event_type: String,
    pub bet_id: Uuid,
    pub user_id: Uuid,
    pub game_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_variant: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub win_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Provider transaction reference; the bet id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WagerEvent {
    pub fn is_completed(&self) -> bool {
        self.event_type == BET_COMPLETED
    }

    pub fn into_wager(self, default_currency: &str) -> Wager {
        Wager {
            id: self.bet_id,
            user_id: self.user_id,
            amount: self.amount,
            payout: self.win_amount,
            currency: self
                .currency
                .unwrap_or_else(|| default_currency.to_string()),
            external_ref: self
                .external_ref
                .unwrap_or_else(|| self.bet_id.to_string()),
            game_type: self.game_type,
            game_id: self.game_variant,
            placed_at: self.timestamp,
        }
    }
}

/// Decode one message. `Ok(None)` means the event is valid but not one that
/// earns cashback.
pub fn decode_wager_event(payload: &[u8], default_currency: &str) -> Result<Option<Wager>, FeedError> {
    let event: WagerEvent = serde_json::from_slice(payload)?;
    if !event.is_completed() {
        debug!(event_type = %event.event_type, bet_id = %event.bet_id, "Skipping non-completed wager event");
        return Ok(None);
    }
    Ok(Some(event.into_wager(default_currency)))
}

/// Counters reported when the feed stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Handle to a running wager feed.
pub struct FeedHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<FeedStats>,
}

impl FeedHandle {
    /// Stop after the message currently being processed.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the feed to finish, either because it was stopped or because
    /// every sender was dropped.
    pub async fn join(self) -> FeedStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Wager feed task ended abnormally");
                FeedStats::default()
            }
        }
    }

    pub async fn shutdown(self) -> FeedStats {
        self.stop();
        self.join().await
    }
}

/// Create a bounded feed channel.
pub fn feed_channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(capacity.max(1))
}

/// Spawn the consumer loop.
pub fn spawn_wager_feed(engine: Arc<CashbackEngine>, mut receiver: mpsc::Receiver<Vec<u8>>) -> FeedHandle {
    let (cancel, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut stats = FeedStats::default();
        info!("Wager feed started");

        loop {
            let message = tokio::select! {
                message = receiver.recv() => message,
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(message) = message else {
                info!("Wager feed channel closed");
                break;
            };

            let wager = match decode_wager_event(&message, &engine.settings().currency) {
                Ok(Some(wager)) => wager,
                Ok(None) => {
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed wager event");
                    stats.failed += 1;
                    continue;
                }
            };

            let (wager_id, user_id) = (wager.id, wager.user_id);
            match engine.process_wager(wager).await {
                Ok(earning) => {
                    stats.processed += 1;
                    debug!(wager_id = %wager_id, earning_id = %earning.id, "Wager event processed");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(wager_id = %wager_id, user_id = %user_id, error = %e, "Failed to process wager event");
                }
            }
        }

        info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Wager feed stopped"
        );
        stats
    });

    FeedHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::model::{HouseEdge, Tier};
    use crate::notify::NoopNotifier;
    use crate::storage::{EarningStore, HouseEdgeStore, MockStore, TierStore};

    fn event(event_type: &str, user_id: Uuid, amount: Decimal) -> WagerEvent {
        WagerEvent {
            event_type: event_type.to_string(),
            bet_id: Uuid::new_v4(),
            user_id,
            game_type: "dice".to_string(),
            game_variant: None,
            amount,
            win_amount: Decimal::ZERO,
            currency: None,
            external_ref: None,
            timestamp: Utc::now(),
        }
    }

    async fn engine(store: Arc<MockStore>) -> Arc<CashbackEngine> {
        store
            .put_tier(Tier {
                id: Uuid::new_v4(),
                level: 1,
                name: "Bronze".to_string(),
                threshold: Decimal::ZERO,
                cashback_percentage: dec!(1),
                bonus_multiplier: dec!(1),
                daily_cap: None,
                weekly_cap: None,
                monthly_cap: None,
                active: true,
            })
            .await
            .unwrap();
        store
            .put_house_edge(HouseEdge {
                game_type: "dice".to_string(),
                game_variant: None,
                edge: dec!(0.01),
                active: true,
            })
            .await
            .unwrap();
        Arc::new(CashbackEngine::new(
            store,
            Arc::new(InMemoryLedger::new()),
            Arc::new(NoopNotifier),
        ))
    }

    #[test]
    fn test_decode_completed_event() {
        let user = Uuid::new_v4();
        let mut e = event(BET_COMPLETED, user, dec!(12.50));
        e.win_amount = dec!(3);
        e.game_variant = Some("dice-classic".to_string());
        let bytes = serde_json::to_vec(&e).unwrap();

        let wager = decode_wager_event(&bytes, "EUR").unwrap().unwrap();
        assert_eq!(wager.id, e.bet_id);
        assert_eq!(wager.user_id, user);
        assert_eq!(wager.amount, dec!(12.50));
        assert_eq!(wager.payout, dec!(3));
        assert_eq!(wager.currency, "EUR");
        assert_eq!(wager.external_ref, e.bet_id.to_string());
        assert_eq!(wager.game_id.as_deref(), Some("dice-classic"));
    }

    #[test]
    fn test_decode_skips_other_event_types() {
        let bytes = serde_json::to_vec(&event("bet_won", Uuid::new_v4(), dec!(1))).unwrap();
        assert!(decode_wager_event(&bytes, "USD").unwrap().is_none());
    }

    #[test]
    fn test_decode_accepts_decimal_strings_and_extra_fields() {
        let json = format!(
            r#"{{"event_type":"bet_completed","bet_id":"{}","user_id":"{}","game_type":"dice",
               "amount":"5.25","win_amount":"0","house_edge":"0.01","timestamp":"2024-05-01T12:00:00Z"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let wager = decode_wager_event(json.as_bytes(), "USD").unwrap().unwrap();
        assert_eq!(wager.amount, dec!(5.25));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_wager_event(b"not json", "USD"),
            Err(FeedError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_processes_until_channel_closes() {
        let store = Arc::new(MockStore::new());
        let engine = engine(store.clone()).await;
        let user = Uuid::new_v4();
        let (tx, rx) = feed_channel(16);
        let handle = spawn_wager_feed(engine, rx);

        tx.send(serde_json::to_vec(&event(BET_COMPLETED, user, dec!(100))).unwrap())
            .await
            .unwrap();
        tx.send(serde_json::to_vec(&event("bet_lost", user, dec!(100))).unwrap())
            .await
            .unwrap();
        tx.send(b"{}".to_vec()).await.unwrap();
        tx.send(serde_json::to_vec(&event(BET_COMPLETED, user, dec!(-1))).unwrap())
            .await
            .unwrap();
        drop(tx);

        let stats = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(
            stats,
            FeedStats {
                processed: 1,
                skipped: 1,
                failed: 2,
            }
        );

        let earnings = store.earnings_for_user(user).await.unwrap();
        assert_eq!(earnings.len(), 1);
        assert_eq!(earnings[0].earned, dec!(1.00));
    }

    #[tokio::test]
    async fn test_feed_stops_on_shutdown() {
        let engine = engine(Arc::new(MockStore::new())).await;
        let (_tx, rx) = feed_channel(4);
        let handle = spawn_wager_feed(engine, rx);

        let stats = tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
        assert_eq!(stats, FeedStats::default());
    }
}
