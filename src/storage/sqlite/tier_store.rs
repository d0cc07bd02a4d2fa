//! Tiers, house edges and per-user progression state.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{
    finish, fmt_ts, get_bool, get_decimal, get_opt_decimal, get_opt_ts, get_string, get_ts,
    get_u32, get_uuid, opt_string, opt_ts, SqliteStore,
};
use crate::model::{HouseEdge, Tier, UserTierState};
use crate::storage::schema::{HouseEdges, Tiers, UserTierStates};
use crate::storage::{
    HouseEdgeStore, ProgressUpdate, Result, StorageError, TierStore, UserStateStore,
};

fn tier_from_row(row: &SqliteRow) -> Result<Tier> {
    Ok(Tier {
        id: get_uuid(row, "id")?,
        level: get_u32(row, "level")?,
        name: get_string(row, "name")?,
        threshold: get_decimal(row, "threshold")?,
        cashback_percentage: get_decimal(row, "cashback_percentage")?,
        bonus_multiplier: get_decimal(row, "bonus_multiplier")?,
        daily_cap: get_opt_decimal(row, "daily_cap")?,
        weekly_cap: get_opt_decimal(row, "weekly_cap")?,
        monthly_cap: get_opt_decimal(row, "monthly_cap")?,
        active: get_bool(row, "active")?,
    })
}

fn house_edge_from_row(row: &SqliteRow) -> Result<HouseEdge> {
    let variant = get_string(row, "game_variant")?;
    Ok(HouseEdge {
        game_type: get_string(row, "game_type")?,
        game_variant: (!variant.is_empty()).then_some(variant),
        edge: get_decimal(row, "edge")?,
        active: get_bool(row, "active")?,
    })
}

pub(super) fn user_state_from_row(row: &SqliteRow) -> Result<UserTierState> {
    Ok(UserTierState {
        user_id: get_uuid(row, "user_id")?,
        current_tier_id: get_uuid(row, "current_tier_id")?,
        current_level: get_u32(row, "current_level")?,
        effective_tier_id: get_uuid(row, "effective_tier_id")?,
        effective_level: get_u32(row, "effective_level")?,
        effective_overridden: get_bool(row, "effective_overridden")?,
        cumulative_revenue: get_decimal(row, "cumulative_revenue")?,
        cumulative_wagered: get_decimal(row, "cumulative_wagered")?,
        cumulative_payout: get_decimal(row, "cumulative_payout")?,
        progress: get_decimal(row, "progress")?,
        last_promoted_at: get_opt_ts(row, "last_promoted_at")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub(super) async fn fetch_user_state(
    conn: &mut SqliteConnection,
    user_id: Uuid,
) -> Result<Option<UserTierState>> {
    let query = Query::select()
        .column(Asterisk)
        .from(UserTierStates::Table)
        .and_where(Expr::col(UserTierStates::UserId).eq(user_id.to_string()))
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| user_state_from_row(&row))
        .transpose()
}

impl SqliteStore {
    async fn apply_progress(conn: &mut SqliteConnection, update: &ProgressUpdate) -> Result<bool> {
        let Some(state) = fetch_user_state(conn, update.user_id).await? else {
            return Err(StorageError::NotFound {
                entity: "user tier state",
                id: update.user_id.to_string(),
            });
        };
        if update.current_level < state.current_level
            || state.cumulative_revenue != update.observed_revenue
        {
            return Ok(false);
        }

        let (effective_tier_id, effective_level) = if state.effective_overridden {
            (state.effective_tier_id, state.effective_level)
        } else {
            (update.current_tier_id, update.current_level)
        };
        let last_promoted_at = update.promoted_at.or(state.last_promoted_at);

        let query = Query::update()
            .table(UserTierStates::Table)
            .values([
                (
                    UserTierStates::CurrentTierId,
                    update.current_tier_id.to_string().into(),
                ),
                (UserTierStates::CurrentLevel, update.current_level.into()),
                (
                    UserTierStates::EffectiveTierId,
                    effective_tier_id.to_string().into(),
                ),
                (UserTierStates::EffectiveLevel, effective_level.into()),
                (UserTierStates::Progress, update.progress.to_string().into()),
                (UserTierStates::LastPromotedAt, opt_ts(last_promoted_at).into()),
                (UserTierStates::UpdatedAt, fmt_ts(update.at).into()),
            ])
            .and_where(Expr::col(UserTierStates::UserId).eq(update.user_id.to_string()))
            .and_where(Expr::col(UserTierStates::CurrentLevel).lte(update.current_level))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TierStore for SqliteStore {
    async fn put_tier(&self, tier: Tier) -> Result<()> {
        let query = Query::insert()
            .into_table(Tiers::Table)
            .columns([
                Tiers::Id,
                Tiers::Level,
                Tiers::Name,
                Tiers::Threshold,
                Tiers::CashbackPercentage,
                Tiers::BonusMultiplier,
                Tiers::DailyCap,
                Tiers::WeeklyCap,
                Tiers::MonthlyCap,
                Tiers::Active,
            ])
            .values_panic([
                tier.id.to_string().into(),
                tier.level.into(),
                tier.name.into(),
                tier.threshold.to_string().into(),
                tier.cashback_percentage.to_string().into(),
                tier.bonus_multiplier.to_string().into(),
                opt_string(tier.daily_cap).into(),
                opt_string(tier.weekly_cap).into(),
                opt_string(tier.monthly_cap).into(),
                tier.active.into(),
            ])
            .on_conflict(
                OnConflict::column(Tiers::Id)
                    .update_columns([
                        Tiers::Level,
                        Tiers::Name,
                        Tiers::Threshold,
                        Tiers::CashbackPercentage,
                        Tiers::BonusMultiplier,
                        Tiers::DailyCap,
                        Tiers::WeeklyCap,
                        Tiers::MonthlyCap,
                        Tiers::Active,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> Result<Option<Tier>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Tiers::Table)
            .and_where(Expr::col(Tiers::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| tier_from_row(&row))
            .transpose()
    }

    async fn get_tier_by_level(&self, level: u32) -> Result<Option<Tier>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Tiers::Table)
            .and_where(Expr::col(Tiers::Level).eq(level))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| tier_from_row(&row))
            .transpose()
    }

    async fn list_tiers(&self, active_only: bool) -> Result<Vec<Tier>> {
        let query = {
            let mut select = Query::select();
            select
                .column(Asterisk)
                .from(Tiers::Table)
                .order_by(Tiers::Level, Order::Asc);
            if active_only {
                select.and_where(Expr::col(Tiers::Active).eq(true));
            }
            select.to_string(SqliteQueryBuilder)
        };

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(tier_from_row).collect()
    }
}

#[async_trait]
impl HouseEdgeStore for SqliteStore {
    async fn put_house_edge(&self, edge: HouseEdge) -> Result<()> {
        let query = Query::insert()
            .into_table(HouseEdges::Table)
            .columns([
                HouseEdges::GameType,
                HouseEdges::GameVariant,
                HouseEdges::Edge,
                HouseEdges::Active,
            ])
            .values_panic([
                edge.game_type.into(),
                edge.game_variant.unwrap_or_default().into(),
                edge.edge.to_string().into(),
                edge.active.into(),
            ])
            .on_conflict(
                OnConflict::columns([HouseEdges::GameType, HouseEdges::GameVariant])
                    .update_columns([HouseEdges::Edge, HouseEdges::Active])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn find_house_edge(
        &self,
        game_type: &str,
        game_variant: Option<&str>,
    ) -> Result<Option<HouseEdge>> {
        let mut candidates = vec![""];
        if let Some(variant) = game_variant.filter(|v| !v.is_empty()) {
            candidates.insert(0, variant);
        }

        for variant in candidates {
            let query = Query::select()
                .column(Asterisk)
                .from(HouseEdges::Table)
                .and_where(Expr::col(HouseEdges::GameType).eq(game_type))
                .and_where(Expr::col(HouseEdges::GameVariant).eq(variant))
                .and_where(Expr::col(HouseEdges::Active).eq(true))
                .to_string(SqliteQueryBuilder);

            if let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? {
                return house_edge_from_row(&row).map(Some);
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl UserStateStore for SqliteStore {
    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserTierState>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user_state(&mut conn, user_id).await
    }

    async fn create_user_state(&self, state: UserTierState) -> Result<UserTierState> {
        let user_id = state.user_id;
        let query = Query::insert()
            .into_table(UserTierStates::Table)
            .columns([
                UserTierStates::UserId,
                UserTierStates::CurrentTierId,
                UserTierStates::CurrentLevel,
                UserTierStates::EffectiveTierId,
                UserTierStates::EffectiveLevel,
                UserTierStates::EffectiveOverridden,
                UserTierStates::CumulativeRevenue,
                UserTierStates::CumulativeWagered,
                UserTierStates::CumulativePayout,
                UserTierStates::Progress,
                UserTierStates::LastPromotedAt,
                UserTierStates::CreatedAt,
                UserTierStates::UpdatedAt,
            ])
            .values_panic([
                state.user_id.to_string().into(),
                state.current_tier_id.to_string().into(),
                state.current_level.into(),
                state.effective_tier_id.to_string().into(),
                state.effective_level.into(),
                state.effective_overridden.into(),
                state.cumulative_revenue.to_string().into(),
                state.cumulative_wagered.to_string().into(),
                state.cumulative_payout.to_string().into(),
                state.progress.to_string().into(),
                opt_ts(state.last_promoted_at).into(),
                fmt_ts(state.created_at).into(),
                fmt_ts(state.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::column(UserTierStates::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let mut conn = self.pool.acquire().await?;
        sqlx::query(&query).execute(&mut *conn).await?;
        fetch_user_state(&mut conn, user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "user tier state",
                id: user_id.to_string(),
            })
    }

    async fn record_progress(&self, update: ProgressUpdate) -> Result<bool> {
        let mut conn = self.begin().await?;
        let result = Self::apply_progress(&mut conn, &update).await;
        finish(&mut conn, result).await
    }

    async fn set_effective_tier(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        level: u32,
        overridden: bool,
    ) -> Result<()> {
        let query = Query::update()
            .table(UserTierStates::Table)
            .values([
                (UserTierStates::EffectiveTierId, tier_id.to_string().into()),
                (UserTierStates::EffectiveLevel, level.into()),
                (UserTierStates::EffectiveOverridden, overridden.into()),
                (UserTierStates::UpdatedAt, fmt_ts(Utc::now()).into()),
            ])
            .and_where(Expr::col(UserTierStates::UserId).eq(user_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "user tier state",
                id: user_id.to_string(),
            });
        }
        Ok(())
    }
}

