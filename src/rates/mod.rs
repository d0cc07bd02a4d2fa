//! Rate resolution.
//!
//! Picks the one rate that governs a wager. Precedence, highest first:
//! 1. enabled global override
//! 2. live scheduled window matching the wager
//! 3. house edge of the wager's game
//!
//! The revenue metric that drives tier progression is always
//! `amount * house edge`, whichever source sets the earned amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::model::{
    round_money, GlobalRateOverride, HouseEdge, RateSource, ScheduledRateWindow, Wager,
};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Snapshot of everything a rate decision depends on, read fresh per wager.
#[derive(Debug, Clone, Copy)]
pub struct RateInputs<'a> {
    pub wager: &'a Wager,
    pub house_edge: Option<&'a HouseEdge>,
    pub global_override: &'a GlobalRateOverride,
    pub windows: &'a [ScheduledRateWindow],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Applied rate as a percentage of the wager amount.
    pub rate: Decimal,
    pub source: RateSource,
    /// Cashback earned, rounded to cents, never negative.
    pub earned: Decimal,
    pub revenue_metric: Decimal,
}

/// Resolve the effective rate for a wager.
pub fn resolve_rate(inputs: &RateInputs<'_>) -> RateDecision {
    let amount = inputs.wager.amount.max(Decimal::ZERO);
    let edge = inputs
        .house_edge
        .filter(|e| e.active)
        .map(|e| e.edge)
        .unwrap_or(Decimal::ZERO);
    let revenue_metric = amount * edge;

    let (rate, source, raw_earned) = if inputs.global_override.enabled {
        let pct = inputs.global_override.percentage;
        (pct, RateSource::GlobalOverride, amount * pct / HUNDRED)
    } else if let Some(window) = select_window(inputs.wager, inputs.windows, inputs.now) {
        (
            window.percentage,
            RateSource::ScheduledWindow(window.id),
            amount * window.percentage / HUNDRED,
        )
    } else {
        (edge * HUNDRED, RateSource::HouseEdge, revenue_metric)
    };

    RateDecision {
        rate,
        source,
        earned: round_money(raw_earned).max(Decimal::ZERO),
        revenue_metric,
    }
}

/// The live window that applies to `wager`, if any.
///
/// Among overlapping matches the most specific scope wins
/// (game id, then game type, then global); ties go to the latest start.
pub fn select_window<'a>(
    wager: &Wager,
    windows: &'a [ScheduledRateWindow],
    now: DateTime<Utc>,
) -> Option<&'a ScheduledRateWindow> {
    windows
        .iter()
        .filter(|w| w.is_live(now) && w.scope.matches(wager))
        .max_by(|a, b| {
            a.scope
                .specificity()
                .cmp(&b.scope.specificity())
                .then(a.starts_at.cmp(&b.starts_at))
                .then(b.id.cmp(&a.id))
        })
}
