//! Earnings and claims.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_query::{Asterisk, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::tier_store::fetch_user_state;
use super::{
    finish, fmt_ts, get_decimal, get_opt_ts, get_opt_uuid, get_string, get_ts, get_u64, get_uuid,
    opt_string, opt_ts, SqliteStore,
};
use crate::model::{Claim, ClaimStatus, Earning, EarningKind, EarningStatus, RateSource};
use crate::storage::schema::{Claims, Earnings, UserTierStates};
use crate::storage::{Allocation, ClaimStore, EarningStore, MetricDelta, Result, StorageError};

fn earning_from_row(row: &SqliteRow) -> Result<Earning> {
    let source = RateSource::from_parts(
        &get_string(row, "source")?,
        get_opt_uuid(row, "source_window_id")?,
    )?;
    Ok(Earning {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        tier_id: get_uuid(row, "tier_id")?,
        source_wager: get_opt_uuid(row, "source_wager")?,
        kind: EarningKind::parse(&get_string(row, "kind")?)?,
        rate: get_decimal(row, "rate")?,
        source,
        revenue_metric: get_decimal(row, "revenue_metric")?,
        earned: get_decimal(row, "earned")?,
        claimed: get_decimal(row, "claimed")?,
        available: get_decimal(row, "available")?,
        status: EarningStatus::parse(&get_string(row, "status")?)?,
        expires_at: get_ts(row, "expires_at")?,
        version: get_u64(row, "version")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
        claimed_at: get_opt_ts(row, "claimed_at")?,
    })
}

fn claim_from_row(row: &SqliteRow) -> Result<Claim> {
    let consumed: BTreeMap<Uuid, Decimal> = serde_json::from_str(&get_string(row, "consumed")?)?;
    Ok(Claim {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        amount: get_decimal(row, "amount")?,
        net_amount: get_decimal(row, "net_amount")?,
        fee: get_decimal(row, "fee")?,
        currency: get_string(row, "currency")?,
        status: ClaimStatus::parse(&get_string(row, "status")?)?,
        consumed,
        created_at: get_ts(row, "created_at")?,
    })
}

async fn fetch_earning(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Earning>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Earnings::Table)
        .and_where(Expr::col(Earnings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| earning_from_row(&row))
        .transpose()
}

/// Write the balance columns of `earning`, guarded on `expected_version` when
/// given. Returns whether a row was updated.
async fn write_balances(
    conn: &mut SqliteConnection,
    earning: &Earning,
    expected_version: Option<u64>,
) -> Result<bool> {
    let query = {
        let mut update = Query::update();
        update
            .table(Earnings::Table)
            .values([
                (Earnings::Claimed, earning.claimed.to_string().into()),
                (Earnings::Available, earning.available.to_string().into()),
                (Earnings::Status, earning.status.as_str().into()),
                (Earnings::ClaimedAt, opt_ts(earning.claimed_at).into()),
                (Earnings::UpdatedAt, fmt_ts(earning.updated_at).into()),
                (Earnings::Version, (earning.version as i64).into()),
            ])
            .and_where(Expr::col(Earnings::Id).eq(earning.id.to_string()));
        if let Some(expected) = expected_version {
            update.and_where(Expr::col(Earnings::Version).eq(expected as i64));
        }
        update.to_string(SqliteQueryBuilder)
    };

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

impl SqliteStore {
    async fn insert_earning_with_metrics(
        conn: &mut SqliteConnection,
        earning: &Earning,
        delta: MetricDelta,
    ) -> Result<bool> {
        if fetch_earning(conn, earning.id).await?.is_some() {
            return Ok(false);
        }

        let Some(state) = fetch_user_state(conn, earning.user_id).await? else {
            return Err(StorageError::NotFound {
                entity: "user tier state",
                id: earning.user_id.to_string(),
            });
        };

        let metrics = Query::update()
            .table(UserTierStates::Table)
            .values([
                (
                    UserTierStates::CumulativeRevenue,
                    (state.cumulative_revenue + delta.revenue).to_string().into(),
                ),
                (
                    UserTierStates::CumulativeWagered,
                    (state.cumulative_wagered + delta.wagered).to_string().into(),
                ),
                (
                    UserTierStates::CumulativePayout,
                    (state.cumulative_payout + delta.payout).to_string().into(),
                ),
                (UserTierStates::UpdatedAt, fmt_ts(earning.created_at).into()),
            ])
            .and_where(Expr::col(UserTierStates::UserId).eq(earning.user_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&metrics).execute(&mut *conn).await?;

        let insert = Query::insert()
            .into_table(Earnings::Table)
            .columns([
                Earnings::Id,
                Earnings::UserId,
                Earnings::TierId,
                Earnings::SourceWager,
                Earnings::Kind,
                Earnings::Rate,
                Earnings::Source,
                Earnings::SourceWindowId,
                Earnings::RevenueMetric,
                Earnings::Earned,
                Earnings::Claimed,
                Earnings::Available,
                Earnings::Status,
                Earnings::ExpiresAt,
                Earnings::Version,
                Earnings::CreatedAt,
                Earnings::UpdatedAt,
                Earnings::ClaimedAt,
            ])
            .values_panic([
                earning.id.to_string().into(),
                earning.user_id.to_string().into(),
                earning.tier_id.to_string().into(),
                opt_string(earning.source_wager).into(),
                earning.kind.as_str().into(),
                earning.rate.to_string().into(),
                earning.source.as_str().into(),
                opt_string(earning.source.window_id()).into(),
                earning.revenue_metric.to_string().into(),
                earning.earned.to_string().into(),
                earning.claimed.to_string().into(),
                earning.available.to_string().into(),
                earning.status.as_str().into(),
                fmt_ts(earning.expires_at).into(),
                (earning.version as i64).into(),
                fmt_ts(earning.created_at).into(),
                fmt_ts(earning.updated_at).into(),
                opt_ts(earning.claimed_at).into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&insert).execute(&mut *conn).await?;

        Ok(true)
    }

    async fn consume_all(
        conn: &mut SqliteConnection,
        allocations: &[Allocation],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for alloc in allocations {
            let conflict = || StorageError::Conflict {
                entity: "earning",
                id: alloc.earning_id.to_string(),
            };
            let mut earning = fetch_earning(conn, alloc.earning_id)
                .await?
                .ok_or_else(conflict)?;
            if earning.version != alloc.expected_version
                || !earning.is_claimable(now)
                || earning.available < alloc.amount
            {
                return Err(conflict());
            }
            earning.consume(alloc.amount, now);
            if !write_balances(conn, &earning, Some(alloc.expected_version)).await? {
                return Err(conflict());
            }
        }
        Ok(())
    }

    async fn release_all(
        conn: &mut SqliteConnection,
        allocations: &[Allocation],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for alloc in allocations {
            if let Some(mut earning) = fetch_earning(conn, alloc.earning_id).await? {
                earning.release(alloc.amount, now);
                write_balances(conn, &earning, None).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EarningStore for SqliteStore {
    async fn record_earning(&self, earning: &Earning, delta: MetricDelta) -> Result<bool> {
        let mut conn = self.begin().await?;
        let result = Self::insert_earning_with_metrics(&mut conn, earning, delta).await;
        finish(&mut conn, result).await
    }

    async fn get_earning(&self, id: Uuid) -> Result<Option<Earning>> {
        let mut conn = self.pool.acquire().await?;
        fetch_earning(&mut conn, id).await
    }

    async fn earnings_for_user(&self, user_id: Uuid) -> Result<Vec<Earning>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Earnings::Table)
            .and_where(Expr::col(Earnings::UserId).eq(user_id.to_string()))
            .order_by(Earnings::CreatedAt, Order::Asc)
            .order_by(Earnings::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(earning_from_row).collect()
    }

    async fn claimable_earnings(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Earning>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Earnings::Table)
            .and_where(Expr::col(Earnings::UserId).eq(user_id.to_string()))
            .and_where(Expr::col(Earnings::Status).eq(EarningStatus::Available.as_str()))
            .and_where(Expr::col(Earnings::ExpiresAt).gt(fmt_ts(now)))
            .order_by(Earnings::CreatedAt, Order::Asc)
            .order_by(Earnings::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut earnings = Vec::with_capacity(rows.len());
        for row in &rows {
            let earning = earning_from_row(row)?;
            if earning.is_claimable(now) {
                earnings.push(earning);
            }
        }
        Ok(earnings)
    }

    async fn consume_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = Self::consume_all(&mut conn, allocations, now).await;
        finish(&mut conn, result).await
    }

    async fn release_earnings(&self, allocations: &[Allocation], now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = Self::release_all(&mut conn, allocations, now).await;
        finish(&mut conn, result).await
    }

    async fn expire_earnings(&self, now: DateTime<Utc>) -> Result<u64> {
        let stamp = fmt_ts(now);
        let query = Query::update()
            .table(Earnings::Table)
            .values([
                (Earnings::Status, EarningStatus::Expired.as_str().into()),
                (Earnings::UpdatedAt, stamp.clone().into()),
                (Earnings::Version, Expr::col(Earnings::Version).add(1)),
            ])
            .and_where(Expr::col(Earnings::Status).eq(EarningStatus::Available.as_str()))
            .and_where(Expr::col(Earnings::ExpiresAt).lte(stamp))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ClaimStore for SqliteStore {
    async fn create_claim(&self, claim: &Claim) -> Result<()> {
        let consumed = serde_json::to_string(&claim.consumed)?;
        let query = Query::insert()
            .into_table(Claims::Table)
            .columns([
                Claims::Id,
                Claims::UserId,
                Claims::Amount,
                Claims::NetAmount,
                Claims::Fee,
                Claims::Currency,
                Claims::Status,
                Claims::Consumed,
                Claims::CreatedAt,
            ])
            .values_panic([
                claim.id.to_string().into(),
                claim.user_id.to_string().into(),
                claim.amount.to_string().into(),
                claim.net_amount.to_string().into(),
                claim.fee.to_string().into(),
                claim.currency.clone().into(),
                claim.status.as_str().into(),
                consumed.into(),
                fmt_ts(claim.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn claims_for_user(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Claims::Table)
            .and_where(Expr::col(Claims::UserId).eq(user_id.to_string()))
            .order_by(Claims::CreatedAt, Order::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(claim_from_row).collect()
    }

    async fn claimed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal> {
        let query = Query::select()
            .column(Claims::Amount)
            .from(Claims::Table)
            .and_where(Expr::col(Claims::UserId).eq(user_id.to_string()))
            .and_where(Expr::col(Claims::CreatedAt).gte(fmt_ts(since)))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| get_decimal(row, "amount"))
            .sum::<Result<Decimal>>()
    }
}
