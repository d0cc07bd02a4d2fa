use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Which rate source governed an earning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "window_id", rename_all = "snake_case")]
pub enum RateSource {
    GlobalOverride,
    ScheduledWindow(Uuid),
    HouseEdge,
    Manual,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSource::GlobalOverride => "global_override",
            RateSource::ScheduledWindow(_) => "scheduled_window",
            RateSource::HouseEdge => "house_edge",
            RateSource::Manual => "manual",
        }
    }

    pub fn window_id(&self) -> Option<Uuid> {
        match self {
            RateSource::ScheduledWindow(id) => Some(*id),
            _ => None,
        }
    }

    pub fn from_parts(kind: &str, window_id: Option<Uuid>) -> Result<Self, UnknownVariant> {
        match (kind, window_id) {
            ("global_override", _) => Ok(RateSource::GlobalOverride),
            ("scheduled_window", Some(id)) => Ok(RateSource::ScheduledWindow(id)),
            ("house_edge", _) => Ok(RateSource::HouseEdge),
            ("manual", _) => Ok(RateSource::Manual),
            (other, _) => Err(UnknownVariant::new("rate source", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningKind {
    Wager,
    Manual,
}

impl EarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningKind::Wager => "wager",
            EarningKind::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "wager" => Ok(EarningKind::Wager),
            "manual" => Ok(EarningKind::Manual),
            other => Err(UnknownVariant::new("earning kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    /// Some amount is still claimable.
    Available,
    /// Fully consumed by claims.
    Claimed,
    /// Passed its expiry while still available.
    Expired,
}

impl EarningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningStatus::Available => "available",
            EarningStatus::Claimed => "claimed",
            EarningStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "available" => Ok(EarningStatus::Available),
            "claimed" => Ok(EarningStatus::Claimed),
            "expired" => Ok(EarningStatus::Expired),
            other => Err(UnknownVariant::new("earning status", other)),
        }
    }
}

/// Cashback credited for one wager (or granted manually).
///
/// Invariant: `available == earned - claimed` and `available >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Earning {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Effective tier at earn time.
    pub tier_id: Uuid,
    pub source_wager: Option<Uuid>,
    pub kind: EarningKind,
    /// Applied rate as a percentage.
    pub rate: Decimal,
    pub source: RateSource,
    pub revenue_metric: Decimal,
    pub earned: Decimal,
    pub claimed: Decimal,
    pub available: Decimal,
    pub status: EarningStatus,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Earning {
    /// Claimable right now.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == EarningStatus::Available
            && self.available > Decimal::ZERO
            && self.expires_at > now
    }

    /// Apply a partial or full consumption. The caller guarantees
    /// `amount <= available`.
    pub fn consume(&mut self, amount: Decimal, now: DateTime<Utc>) {
        self.claimed += amount;
        self.available = self.earned - self.claimed;
        if self.available <= Decimal::ZERO {
            self.available = Decimal::ZERO;
            self.status = EarningStatus::Claimed;
        }
        self.claimed_at = Some(now);
        self.updated_at = now;
        self.version += 1;
    }

    /// Undo a consumption made by a claim that never credited funds.
    pub fn release(&mut self, amount: Decimal, now: DateTime<Utc>) {
        self.claimed -= amount;
        self.available = self.earned - self.claimed;
        if self.status == EarningStatus::Claimed && self.available > Decimal::ZERO {
            self.status = EarningStatus::Available;
        }
        self.updated_at = now;
        self.version += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Completed,
    /// Funds were credited but the claim record could not be persisted.
    ReconciliationRequired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Completed => "completed",
            ClaimStatus::ReconciliationRequired => "reconciliation_required",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "completed" => Ok(ClaimStatus::Completed),
            "reconciliation_required" => Ok(ClaimStatus::ReconciliationRequired),
            other => Err(UnknownVariant::new("claim status", other)),
        }
    }
}

/// A payout of available cashback to the user's balance.
///
/// Invariant: the values of `consumed` sum to `amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub net_amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub status: ClaimStatus,
    pub consumed: BTreeMap<Uuid, Decimal>,
    pub created_at: DateTime<Utc>,
}
