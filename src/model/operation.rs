use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Earning, UnknownVariant, Wager};

/// Snapshot needed to replay wager processing.
///
/// Carries the earning built on first execution so a replay inserts the same
/// earning id instead of minting a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessWagerPayload {
    pub wager: Wager,
    pub earning: Earning,
    pub revenue_metric: Decimal,
}

/// Snapshot needed to replay an admin-granted earning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEarningPayload {
    pub earning: Earning,
    pub reason: String,
}

/// Typed payload of a retryable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    ProcessWagerCashback(ProcessWagerPayload),
    ManualEarning(ManualEarningPayload),
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::ProcessWagerCashback(_) => OperationKind::ProcessWagerCashback,
            OperationPayload::ManualEarning(_) => OperationKind::ManualEarning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ProcessWagerCashback,
    ManualEarning,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProcessWagerCashback => "process_wager_cashback",
            OperationKind::ManualEarning => "manual_earning",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "process_wager_cashback" => Ok(OperationKind::ProcessWagerCashback),
            "manual_earning" => Ok(OperationKind::ManualEarning),
            other => Err(UnknownVariant::new("operation kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Retrying,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Retrying => "retrying",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownVariant> {
        match value {
            "pending" => Ok(OperationStatus::Pending),
            "retrying" => Ok(OperationStatus::Retrying),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(UnknownVariant::new("operation status", other)),
        }
    }
}

/// Persisted record of a financial side effect executed with retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryableOperation {
    pub id: Uuid,
    pub owner: Uuid,
    pub payload: OperationPayload,
    /// Retries performed so far; 0 while the first execution runs.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: OperationStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryableOperation {
    pub fn new(owner: Uuid, payload: OperationPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            payload,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            status: OperationStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}
