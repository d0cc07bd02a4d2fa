//! Domain types shared by every component.
//!
//! Money is always `rust_decimal::Decimal`, identifiers are UUIDs and
//! timestamps are UTC. Status enums carry their storage representation via
//! `as_str`/`parse` so backends never hand-roll string matching.

mod earning;
mod operation;
mod schedule;
mod tier;
mod wager;

pub use earning::{Claim, ClaimStatus, Earning, EarningKind, EarningStatus, RateSource};
pub use operation::{
    ManualEarningPayload, OperationKind, OperationPayload, OperationStatus,
    ProcessWagerPayload, RetryableOperation,
};
pub use schedule::{GlobalRateOverride, ScheduledRateWindow, WindowScope, WindowStatus};
pub use tier::{HouseEdge, Tier, UserTierState};
pub use wager::Wager;

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places money is rounded to.
pub const MONEY_SCALE: u32 = 2;

/// Round a money amount to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
