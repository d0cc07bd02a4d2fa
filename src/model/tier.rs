use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A loyalty tier, qualified for by cumulative revenue metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: Uuid,
    /// Ordered level; higher levels require a higher threshold.
    pub level: u32,
    pub name: String,
    /// Minimum cumulative revenue metric needed to reach this tier.
    pub threshold: Decimal,
    pub cashback_percentage: Decimal,
    pub bonus_multiplier: Decimal,
    pub daily_cap: Option<Decimal>,
    pub weekly_cap: Option<Decimal>,
    pub monthly_cap: Option<Decimal>,
    pub active: bool,
}

/// Configured house edge for a game family or a single variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseEdge {
    pub game_type: String,
    /// `None` applies to every variant of the game type without its own row.
    pub game_variant: Option<String>,
    /// Fraction in [0, 1], e.g. 0.02 for a 2% edge.
    pub edge: Decimal,
    pub active: bool,
}

/// Per-user tier progression state.
///
/// `current_*` is the earned tier and drives progression math.
/// `effective_*` is used for rate and cap lookups and may be pinned by an
/// admin (`effective_overridden`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTierState {
    pub user_id: Uuid,
    pub current_tier_id: Uuid,
    pub current_level: u32,
    pub effective_tier_id: Uuid,
    pub effective_level: u32,
    pub effective_overridden: bool,
    pub cumulative_revenue: Decimal,
    pub cumulative_wagered: Decimal,
    pub cumulative_payout: Decimal,
    /// Progress toward the next tier, in [0, 1].
    pub progress: Decimal,
    pub last_promoted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserTierState {
    /// Fresh state for a user seen for the first time.
    pub fn bootstrap(user_id: Uuid, lowest: &Tier, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current_tier_id: lowest.id,
            current_level: lowest.level,
            effective_tier_id: lowest.id,
            effective_level: lowest.level,
            effective_overridden: false,
            cumulative_revenue: Decimal::ZERO,
            cumulative_wagered: Decimal::ZERO,
            cumulative_payout: Decimal::ZERO,
            progress: Decimal::ZERO,
            last_promoted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
