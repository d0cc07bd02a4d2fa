use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{UnknownVariant, Wager};

/// Singleton "happy hour" override. Updated only by compare-and-swap on
/// `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRateOverride {
    pub enabled: bool,
    /// Percentage of the wager amount, in [0, 100].
    pub percentage: Decimal,
    pub enabled_by: Option<Uuid>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_by: Option<Uuid>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Default for GlobalRateOverride {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: Decimal::ZERO,
            enabled_by: None,
            enabled_at: None,
            disabled_by: None,
            disabled_at: None,
            version: 0,
        }
    }
}

/// Which wagers a scheduled window applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WindowScope {
    Global,
    GameType(String),
    GameId(String),
}

impl WindowScope {
    pub fn matches(&self, wager: &Wager) -> bool {
        match self {
            WindowScope::Global => true,
            WindowScope::GameType(game_type) => wager.game_type == *game_type,
            WindowScope::GameId(game_id) => wager.game_id.as_deref() == Some(game_id.as_str()),
        }
    }

    /// Higher is more specific. Used to pick between overlapping windows.
    pub fn specificity(&self) -> u8 {
        match self {
            WindowScope::Global => 0,
            WindowScope::GameType(_) => 1,
            WindowScope::GameId(_) => 2,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WindowScope::Global => "global",
            WindowScope::GameType(_) => "game_type",
            WindowScope::GameId(_) => "game_id",
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            WindowScope::Global => None,
            WindowScope::GameType(v) | WindowScope::GameId(v) => Some(v),
        }
    }

    pub fn from_parts(kind: &str, value: Option<String>) -> Result<Self, UnknownVariant> {
        match (kind, value) {
            ("global", _) => Ok(WindowScope::Global),
            ("game_type", Some(v)) => Ok(WindowScope::GameType(v)),
            ("game_id", Some(v)) => Ok(WindowScope::GameId(v)),
            (other, _) => Err(UnknownVariant::new("window scope", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Scheduled => "scheduled",
            WindowStatus::Active => "active",
            WindowStatus::Completed => "completed",
            WindowStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "scheduled" => Ok(WindowStatus::Scheduled),
            "active" => Ok(WindowStatus::Active),
            "completed" => Ok(WindowStatus::Completed),
            "cancelled" => Ok(WindowStatus::Cancelled),
            other => Err(UnknownVariant::new("window status", other)),
        }
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(&self, next: WindowStatus) -> bool {
        matches!(
            (self, next),
            (WindowStatus::Scheduled, WindowStatus::Active)
                | (WindowStatus::Scheduled, WindowStatus::Cancelled)
                | (WindowStatus::Active, WindowStatus::Completed)
                | (WindowStatus::Active, WindowStatus::Cancelled)
        )
    }
}

/// A time-boxed promotional rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRateWindow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Percentage of the wager amount, in [0, 100].
    pub percentage: Decimal,
    pub scope: WindowScope,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: WindowStatus,
    pub created_by: Option<Uuid>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledRateWindow {
    /// Active and `starts_at <= now < ends_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == WindowStatus::Active && self.starts_at <= now && now < self.ends_at
    }
}
