//! User notifications.
//!
//! Pushing is synchronous and must never block the caller; every engine call
//! site treats failure as best-effort and only logs it.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{ClaimStatus, RateSource};

/// Something a user should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    EarningCredited {
        earning_id: Uuid,
        amount: Decimal,
        source: RateSource,
    },
    TierPromoted {
        from_level: u32,
        to_level: u32,
        tier_name: String,
    },
    CashbackClaimed {
        claim_id: Uuid,
        amount: Decimal,
        status: ClaimStatus,
    },
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserNotification {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub notification: Notification,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,
}

/// Outbound channel for user notifications.
pub trait NotificationChannel: Send + Sync {
    fn push(&self, user_id: Uuid, notification: Notification) -> Result<(), NotifyError>;
}

/// Fans notifications out to in-process subscribers.
///
/// Notifications are dropped when nobody is subscribed.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<UserNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserNotification> {
        self.sender.subscribe()
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn push(&self, user_id: Uuid, notification: Notification) -> Result<(), NotifyError> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(UserNotification {
                user_id,
                notification,
            })
            .map(|_| ())
            .map_err(|_| NotifyError::Closed)
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotificationChannel for NoopNotifier {
    fn push(&self, _user_id: Uuid, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
