use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed wager. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payout: Decimal,
    pub currency: String,
    /// Reference assigned by the game provider.
    pub external_ref: String,
    /// Provider or game family, e.g. "slots" or "crash".
    pub game_type: String,
    /// Concrete game or variant within the family.
    pub game_id: Option<String>,
    pub placed_at: DateTime<Utc>,
}
