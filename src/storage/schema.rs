//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Table DDL lives in `migrations/sqlite`.

use sea_query::Iden;

/// Tiers table schema.
#[derive(Iden)]
pub enum Tiers {
    #[iden = "tiers"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "level"]
    Level,
    #[iden = "name"]
    Name,
    #[iden = "threshold"]
    Threshold,
    #[iden = "cashback_percentage"]
    CashbackPercentage,
    #[iden = "bonus_multiplier"]
    BonusMultiplier,
    #[iden = "daily_cap"]
    DailyCap,
    #[iden = "weekly_cap"]
    WeeklyCap,
    #[iden = "monthly_cap"]
    MonthlyCap,
    #[iden = "active"]
    Active,
}

/// House edges table schema.
#[derive(Iden)]
pub enum HouseEdges {
    #[iden = "house_edges"]
    Table,
    #[iden = "game_type"]
    GameType,
    #[iden = "game_variant"]
    GameVariant,
    #[iden = "edge"]
    Edge,
    #[iden = "active"]
    Active,
}

/// User tier states table schema.
#[derive(Iden)]
pub enum UserTierStates {
    #[iden = "user_tier_states"]
    Table,
    #[iden = "user_id"]
    UserId,
    #[iden = "current_tier_id"]
    CurrentTierId,
    #[iden = "current_level"]
    CurrentLevel,
    #[iden = "effective_tier_id"]
    EffectiveTierId,
    #[iden = "effective_level"]
    EffectiveLevel,
    #[iden = "effective_overridden"]
    EffectiveOverridden,
    #[iden = "cumulative_revenue"]
    CumulativeRevenue,
    #[iden = "cumulative_wagered"]
    CumulativeWagered,
    #[iden = "cumulative_payout"]
    CumulativePayout,
    #[iden = "progress"]
    Progress,
    #[iden = "last_promoted_at"]
    LastPromotedAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Global rate override singleton schema.
#[derive(Iden)]
pub enum GlobalRateOverrides {
    #[iden = "global_rate_override"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "enabled"]
    Enabled,
    #[iden = "percentage"]
    Percentage,
    #[iden = "enabled_by"]
    EnabledBy,
    #[iden = "enabled_at"]
    EnabledAt,
    #[iden = "disabled_by"]
    DisabledBy,
    #[iden = "disabled_at"]
    DisabledAt,
    #[iden = "version"]
    Version,
}

/// Scheduled rate windows table schema.
#[derive(Iden)]
pub enum RateWindows {
    #[iden = "rate_windows"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "description"]
    Description,
    #[iden = "percentage"]
    Percentage,
    #[iden = "scope_type"]
    ScopeType,
    #[iden = "scope_value"]
    ScopeValue,
    #[iden = "starts_at"]
    StartsAt,
    #[iden = "ends_at"]
    EndsAt,
    #[iden = "status"]
    Status,
    #[iden = "created_by"]
    CreatedBy,
    #[iden = "activated_at"]
    ActivatedAt,
    #[iden = "deactivated_at"]
    DeactivatedAt,
    #[iden = "created_at"]
    CreatedAt,
}

/// Earnings table schema.
#[derive(Iden)]
pub enum Earnings {
    #[iden = "earnings"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "tier_id"]
    TierId,
    #[iden = "source_wager"]
    SourceWager,
    #[iden = "kind"]
    Kind,
    #[iden = "rate"]
    Rate,
    #[iden = "source"]
    Source,
    #[iden = "source_window_id"]
    SourceWindowId,
    #[iden = "revenue_metric"]
    RevenueMetric,
    #[iden = "earned"]
    Earned,
    #[iden = "claimed"]
    Claimed,
    #[iden = "available"]
    Available,
    #[iden = "status"]
    Status,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "version"]
    Version,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "claimed_at"]
    ClaimedAt,
}

/// Claims table schema.
#[derive(Iden)]
pub enum Claims {
    #[iden = "claims"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "amount"]
    Amount,
    #[iden = "net_amount"]
    NetAmount,
    #[iden = "fee"]
    Fee,
    #[iden = "currency"]
    Currency,
    #[iden = "status"]
    Status,
    #[iden = "consumed"]
    Consumed,
    #[iden = "created_at"]
    CreatedAt,
}

/// Retryable operations table schema.
#[derive(Iden)]
pub enum RetryableOperations {
    #[iden = "retryable_operations"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "owner"]
    Owner,
    #[iden = "kind"]
    Kind,
    #[iden = "payload"]
    Payload,
    #[iden = "attempts"]
    Attempts,
    #[iden = "last_error"]
    LastError,
    #[iden = "next_attempt_at"]
    NextAttemptAt,
    #[iden = "status"]
    Status,
    #[iden = "version"]
    Version,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
