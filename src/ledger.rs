//! User balance ledger.
//!
//! Claims credit funds through [`BalanceLedger`]; the engine never touches
//! balances directly.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Credit rejected for user {user_id}: {reason}")]
    Rejected { user_id: Uuid, reason: String },
}

/// Atomic balance mutations.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Add `amount` to the user's balance and return the new balance.
    async fn add_balance(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError>;
}

/// In-memory ledger for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<Uuid, Decimal>>,
    fail_on_credit: RwLock<bool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn balance(&self, user_id: Uuid) -> Decimal {
        self.balances
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn set_fail_on_credit(&self, fail: bool) {
        *self.fail_on_credit.write().await = fail;
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn add_balance(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError> {
        if *self.fail_on_credit.read().await {
            return Err(LedgerError::Unavailable("injected credit failure".to_string()));
        }
        if amount < Decimal::ZERO {
            return Err(LedgerError::Rejected {
                user_id,
                reason: format!("negative credit {amount}"),
            });
        }
        let mut balances = self.balances.write().await;
        let balance = balances.entry(user_id).or_insert(Decimal::ZERO);
        *balance += amount;
        Ok(*balance)
    }
}
