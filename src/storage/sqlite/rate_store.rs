//! Global override singleton and scheduled rate windows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Asterisk, Expr, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{
    fmt_ts, get_bool, get_decimal, get_opt_string, get_opt_ts, get_opt_uuid, get_string, get_ts,
    get_u64, get_uuid, opt_string, opt_ts, SqliteStore,
};
use crate::model::{GlobalRateOverride, ScheduledRateWindow, WindowScope, WindowStatus};
use crate::storage::schema::{GlobalRateOverrides, RateWindows};
use crate::storage::{OverrideStore, Result, ScheduleStore, StorageError};

const OVERRIDE_ROW_ID: i64 = 1;

fn override_from_row(row: &SqliteRow) -> Result<GlobalRateOverride> {
    Ok(GlobalRateOverride {
        enabled: get_bool(row, "enabled")?,
        percentage: get_decimal(row, "percentage")?,
        enabled_by: get_opt_uuid(row, "enabled_by")?,
        enabled_at: get_opt_ts(row, "enabled_at")?,
        disabled_by: get_opt_uuid(row, "disabled_by")?,
        disabled_at: get_opt_ts(row, "disabled_at")?,
        version: get_u64(row, "version")?,
    })
}

fn window_from_row(row: &SqliteRow) -> Result<ScheduledRateWindow> {
    let scope = WindowScope::from_parts(
        &get_string(row, "scope_type")?,
        get_opt_string(row, "scope_value")?,
    )?;
    Ok(ScheduledRateWindow {
        id: get_uuid(row, "id")?,
        name: get_string(row, "name")?,
        description: get_opt_string(row, "description")?,
        percentage: get_decimal(row, "percentage")?,
        scope,
        starts_at: get_ts(row, "starts_at")?,
        ends_at: get_ts(row, "ends_at")?,
        status: WindowStatus::parse(&get_string(row, "status")?)?,
        created_by: get_opt_uuid(row, "created_by")?,
        activated_at: get_opt_ts(row, "activated_at")?,
        deactivated_at: get_opt_ts(row, "deactivated_at")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn select_windows() -> SelectStatement {
    Query::select()
        .column(Asterisk)
        .from(RateWindows::Table)
        .order_by(RateWindows::StartsAt, Order::Asc)
        .order_by(RateWindows::Id, Order::Asc)
        .to_owned()
}

impl SqliteStore {
    async fn fetch_windows(&self, query: String) -> Result<Vec<ScheduledRateWindow>> {
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(window_from_row).collect()
    }
}

#[async_trait]
impl OverrideStore for SqliteStore {
    async fn get_override(&self) -> Result<GlobalRateOverride> {
        let query = Query::select()
            .column(Asterisk)
            .from(GlobalRateOverrides::Table)
            .and_where(Expr::col(GlobalRateOverrides::Id).eq(OVERRIDE_ROW_ID))
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => override_from_row(&row),
            None => Ok(GlobalRateOverride::default()),
        }
    }

    async fn swap_override(
        &self,
        mut next: GlobalRateOverride,
        expected_version: u64,
    ) -> Result<GlobalRateOverride> {
        next.version = expected_version + 1;

        let query = Query::update()
            .table(GlobalRateOverrides::Table)
            .values([
                (GlobalRateOverrides::Enabled, next.enabled.into()),
                (
                    GlobalRateOverrides::Percentage,
                    next.percentage.to_string().into(),
                ),
                (GlobalRateOverrides::EnabledBy, opt_string(next.enabled_by).into()),
                (GlobalRateOverrides::EnabledAt, opt_ts(next.enabled_at).into()),
                (
                    GlobalRateOverrides::DisabledBy,
                    opt_string(next.disabled_by).into(),
                ),
                (GlobalRateOverrides::DisabledAt, opt_ts(next.disabled_at).into()),
                (GlobalRateOverrides::Version, (next.version as i64).into()),
            ])
            .and_where(Expr::col(GlobalRateOverrides::Id).eq(OVERRIDE_ROW_ID))
            .and_where(Expr::col(GlobalRateOverrides::Version).eq(expected_version as i64))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let current = self.get_override().await?;
            return Err(StorageError::Conflict {
                entity: "global rate override",
                id: current.version.to_string(),
            });
        }
        Ok(next)
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_window(&self, window: ScheduledRateWindow) -> Result<()> {
        let query = Query::insert()
            .into_table(RateWindows::Table)
            .columns([
                RateWindows::Id,
                RateWindows::Name,
                RateWindows::Description,
                RateWindows::Percentage,
                RateWindows::ScopeType,
                RateWindows::ScopeValue,
                RateWindows::StartsAt,
                RateWindows::EndsAt,
                RateWindows::Status,
                RateWindows::CreatedBy,
                RateWindows::ActivatedAt,
                RateWindows::DeactivatedAt,
                RateWindows::CreatedAt,
            ])
            .values_panic([
                window.id.to_string().into(),
                window.name.into(),
                window.description.into(),
                window.percentage.to_string().into(),
                window.scope.kind().into(),
                window.scope.value().map(str::to_string).into(),
                fmt_ts(window.starts_at).into(),
                fmt_ts(window.ends_at).into(),
                window.status.as_str().into(),
                opt_string(window.created_by).into(),
                opt_ts(window.activated_at).into(),
                opt_ts(window.deactivated_at).into(),
                fmt_ts(window.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_window(&self, id: Uuid) -> Result<Option<ScheduledRateWindow>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RateWindows::Table)
            .and_where(Expr::col(RateWindows::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| window_from_row(&row))
            .transpose()
    }

    async fn list_windows(&self, status: Option<WindowStatus>) -> Result<Vec<ScheduledRateWindow>> {
        let query = {
            let mut select = select_windows();
            if let Some(status) = status {
                select.and_where(Expr::col(RateWindows::Status).eq(status.as_str()));
            }
            select.to_string(SqliteQueryBuilder)
        };
        self.fetch_windows(query).await
    }

    async fn update_window(&self, window: ScheduledRateWindow) -> Result<bool> {
        let query = Query::update()
            .table(RateWindows::Table)
            .values([
                (RateWindows::Name, window.name.into()),
                (RateWindows::Description, window.description.into()),
                (RateWindows::Percentage, window.percentage.to_string().into()),
                (RateWindows::ScopeType, window.scope.kind().into()),
                (
                    RateWindows::ScopeValue,
                    window.scope.value().map(str::to_string).into(),
                ),
                (RateWindows::StartsAt, fmt_ts(window.starts_at).into()),
                (RateWindows::EndsAt, fmt_ts(window.ends_at).into()),
            ])
            .and_where(Expr::col(RateWindows::Id).eq(window.id.to_string()))
            .and_where(Expr::col(RateWindows::Status).eq(WindowStatus::Scheduled.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn windows_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let query = select_windows()
            .and_where(Expr::col(RateWindows::Status).eq(WindowStatus::Scheduled.as_str()))
            .and_where(Expr::col(RateWindows::StartsAt).lte(fmt_ts(now)))
            .to_string(SqliteQueryBuilder);
        self.fetch_windows(query).await
    }

    async fn windows_to_deactivate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let query = select_windows()
            .and_where(Expr::col(RateWindows::Status).eq(WindowStatus::Active.as_str()))
            .and_where(Expr::col(RateWindows::EndsAt).lte(fmt_ts(now)))
            .to_string(SqliteQueryBuilder);
        self.fetch_windows(query).await
    }

    async fn live_windows(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRateWindow>> {
        let now = fmt_ts(now);
        let query = select_windows()
            .and_where(Expr::col(RateWindows::Status).eq(WindowStatus::Active.as_str()))
            .and_where(Expr::col(RateWindows::StartsAt).lte(now.clone()))
            .and_where(Expr::col(RateWindows::EndsAt).gt(now))
            .to_string(SqliteQueryBuilder);
        self.fetch_windows(query).await
    }

    async fn transition_window(
        &self,
        id: Uuid,
        from: WindowStatus,
        to: WindowStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let stamp = match to {
            WindowStatus::Active => Some(RateWindows::ActivatedAt),
            WindowStatus::Completed | WindowStatus::Cancelled => Some(RateWindows::DeactivatedAt),
            WindowStatus::Scheduled => None,
        };

        let query = {
            let mut update = Query::update();
            update
                .table(RateWindows::Table)
                .value(RateWindows::Status, to.as_str())
                .and_where(Expr::col(RateWindows::Id).eq(id.to_string()))
                .and_where(Expr::col(RateWindows::Status).eq(from.as_str()));
            if let Some(column) = stamp {
                update.value(column, fmt_ts(at));
            }
            update.to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}
