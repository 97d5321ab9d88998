//! Database query functions for the `activities` and `period_specs` tables.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Activity, PeriodSpec};

/// Insert a new activity. Returns the row with server-generated defaults.
pub async fn insert_activity<'e>(
    executor: impl PgExecutor<'e>,
    coach_id: Uuid,
    title: &str,
) -> Result<Activity> {
    let activity = sqlx::query_as::<_, Activity>(
        "INSERT INTO activities (coach_id, title) \
         VALUES ($1, $2) \
         RETURNING *",
    )
    .bind(coach_id)
    .bind(title)
    .fetch_one(executor)
    .await
    .context("failed to insert activity")?;

    Ok(activity)
}

/// Fetch an activity by its ID.
pub async fn get_activity<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Activity>> {
    let activity = sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch activity")?;

    Ok(activity)
}

/// List a coach's activities, newest first.
pub async fn list_activities_for_coach<'e>(
    executor: impl PgExecutor<'e>,
    coach_id: Uuid,
) -> Result<Vec<Activity>> {
    let activities = sqlx::query_as::<_, Activity>(
        "SELECT * FROM activities WHERE coach_id = $1 ORDER BY created_at DESC",
    )
    .bind(coach_id)
    .fetch_all(executor)
    .await
    .context("failed to list activities for coach")?;

    Ok(activities)
}

/// Insert or replace the period count of an activity.
pub async fn upsert_period_spec<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
    period_count: i32,
) -> Result<PeriodSpec> {
    if period_count < 1 {
        anyhow::bail!("period count must be at least 1, got {period_count}");
    }

    let spec = sqlx::query_as::<_, PeriodSpec>(
        "INSERT INTO period_specs (activity_id, period_count) \
         VALUES ($1, $2) \
         ON CONFLICT (activity_id) \
         DO UPDATE SET period_count = EXCLUDED.period_count, updated_at = now() \
         RETURNING *",
    )
    .bind(activity_id)
    .bind(period_count)
    .fetch_one(executor)
    .await
    .context("failed to upsert period spec")?;

    Ok(spec)
}

/// Fetch the period count of an activity, if one was ever written.
pub async fn get_period_count<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
) -> Result<Option<i32>> {
    let count: Option<i32> =
        sqlx::query_scalar("SELECT period_count FROM period_specs WHERE activity_id = $1")
            .bind(activity_id)
            .fetch_optional(executor)
            .await
            .context("failed to fetch period count")?;

    Ok(count)
}
