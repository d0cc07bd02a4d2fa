//! Engine, scheduler and background task settings.

use std::time::Duration;

use serde::Deserialize;

/// Backoff settings for retryable financial operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first execution; total executions = max_retries + 1.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fractional jitter applied symmetrically, e.g. 0.1 for ±10%.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Rate window scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Earning lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EarningsSettings {
    /// Days an unclaimed earning stays claimable.
    pub ttl_days: i64,
    /// Currency recorded on claims.
    pub currency: String,
}

impl Default for EarningsSettings {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            currency: "USD".to_string(),
        }
    }
}

impl EarningsSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days.max(0))
    }
}

/// Background sweep settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub expiry_interval_secs: u64,
    pub retry_sweep_interval_secs: u64,
    /// Pending/retrying operations untouched for this long are resumed.
    pub stale_operation_secs: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 3600,
            retry_sweep_interval_secs: 300,
            stale_operation_secs: 600,
        }
    }
}

impl MaintenanceSettings {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }

    pub fn retry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retry_sweep_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_operation_secs)
    }
}

/// Wager feed settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}
