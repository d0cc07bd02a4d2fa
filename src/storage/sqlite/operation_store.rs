//! Retryable operation records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Asterisk, Cond, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{
    fmt_ts, get_opt_string, get_opt_ts, get_string, get_ts, get_u32, get_u64, get_uuid, opt_ts,
    SqliteStore,
};
use crate::model::{OperationKind, OperationPayload, OperationStatus, RetryableOperation};
use crate::storage::schema::RetryableOperations;
use crate::storage::{OperationStore, Result, StorageError};

fn operation_from_row(row: &SqliteRow) -> Result<RetryableOperation> {
    let payload: OperationPayload = serde_json::from_str(&get_string(row, "payload")?)?;
    let kind = OperationKind::parse(&get_string(row, "kind")?)?;
    if payload.kind() != kind {
        return Err(StorageError::Decode(format!(
            "operation kind column {} does not match payload {}",
            kind.as_str(),
            payload.kind().as_str()
        )));
    }
    Ok(RetryableOperation {
        id: get_uuid(row, "id")?,
        owner: get_uuid(row, "owner")?,
        payload,
        attempts: get_u32(row, "attempts")?,
        last_error: get_opt_string(row, "last_error")?,
        next_attempt_at: get_opt_ts(row, "next_attempt_at")?,
        status: OperationStatus::parse(&get_string(row, "status")?)?,
        version: get_u64(row, "version")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

impl SqliteStore {
    async fn fetch_operations(&self, query: String) -> Result<Vec<RetryableOperation>> {
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(operation_from_row).collect()
    }
}

#[async_trait]
impl OperationStore for SqliteStore {
    async fn create_operation(&self, op: &RetryableOperation) -> Result<()> {
        let payload = serde_json::to_string(&op.payload)?;
        let query = Query::insert()
            .into_table(RetryableOperations::Table)
            .columns([
                RetryableOperations::Id,
                RetryableOperations::Owner,
                RetryableOperations::Kind,
                RetryableOperations::Payload,
                RetryableOperations::Attempts,
                RetryableOperations::LastError,
                RetryableOperations::NextAttemptAt,
                RetryableOperations::Status,
                RetryableOperations::Version,
                RetryableOperations::CreatedAt,
                RetryableOperations::UpdatedAt,
            ])
            .values_panic([
                op.id.to_string().into(),
                op.owner.to_string().into(),
                op.kind().as_str().into(),
                payload.into(),
                op.attempts.into(),
                op.last_error.clone().into(),
                opt_ts(op.next_attempt_at).into(),
                op.status.as_str().into(),
                (op.version as i64).into(),
                fmt_ts(op.created_at).into(),
                fmt_ts(op.updated_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<RetryableOperation>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RetryableOperations::Table)
            .and_where(Expr::col(RetryableOperations::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| operation_from_row(&row))
            .transpose()
    }

    async fn update_operation(
        &self,
        op: &RetryableOperation,
        expected_version: u64,
    ) -> Result<bool> {
        let payload = serde_json::to_string(&op.payload)?;
        let query = Query::update()
            .table(RetryableOperations::Table)
            .values([
                (RetryableOperations::Payload, payload.into()),
                (RetryableOperations::Attempts, op.attempts.into()),
                (RetryableOperations::LastError, op.last_error.clone().into()),
                (
                    RetryableOperations::NextAttemptAt,
                    opt_ts(op.next_attempt_at).into(),
                ),
                (RetryableOperations::Status, op.status.as_str().into()),
                (RetryableOperations::Version, (op.version as i64).into()),
                (RetryableOperations::UpdatedAt, fmt_ts(op.updated_at).into()),
            ])
            .and_where(Expr::col(RetryableOperations::Id).eq(op.id.to_string()))
            .and_where(Expr::col(RetryableOperations::Version).eq(expected_version as i64))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn operations_for_user(&self, user_id: Uuid) -> Result<Vec<RetryableOperation>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RetryableOperations::Table)
            .and_where(Expr::col(RetryableOperations::Owner).eq(user_id.to_string()))
            .order_by(RetryableOperations::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_operations(query).await
    }

    async fn failed_operations(&self, now: DateTime<Utc>) -> Result<Vec<RetryableOperation>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RetryableOperations::Table)
            .cond_where(
                Cond::all()
                    .add(
                        Expr::col(RetryableOperations::Status)
                            .eq(OperationStatus::Failed.as_str()),
                    )
                    .add(
                        Cond::any()
                            .add(Expr::col(RetryableOperations::NextAttemptAt).is_null())
                            .add(Expr::col(RetryableOperations::NextAttemptAt).lte(fmt_ts(now))),
                    ),
            )
            .order_by(RetryableOperations::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_operations(query).await
    }

    async fn stale_operations(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RetryableOperation>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RetryableOperations::Table)
            .and_where(Expr::col(RetryableOperations::Status).is_in([
                OperationStatus::Pending.as_str(),
                OperationStatus::Retrying.as_str(),
            ]))
            .and_where(Expr::col(RetryableOperations::UpdatedAt).lt(fmt_ts(updated_before)))
            .order_by(RetryableOperations::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_operations(query).await
    }
}
