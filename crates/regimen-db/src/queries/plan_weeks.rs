//! Database query functions for the `plan_weeks` table.
//!
//! The `days` column is stored and returned as raw JSON. Decoding into the
//! typed day-slot model happens in `regimen-core`.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::PlanWeek;

/// Insert a week, or replace the day slots of an existing one.
pub async fn upsert_plan_week<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
    week_number: i32,
    days: &serde_json::Value,
) -> Result<PlanWeek> {
    let week = sqlx::query_as::<_, PlanWeek>(
        "INSERT INTO plan_weeks (activity_id, week_number, days) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (activity_id, week_number) \
         DO UPDATE SET days = EXCLUDED.days, updated_at = now() \
         RETURNING *",
    )
    .bind(activity_id)
    .bind(week_number)
    .bind(days)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to upsert plan week {week_number}"))?;

    Ok(week)
}

/// List all weeks of an activity in ascending week order.
pub async fn list_plan_weeks<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
) -> Result<Vec<PlanWeek>> {
    let weeks = sqlx::query_as::<_, PlanWeek>(
        "SELECT * FROM plan_weeks WHERE activity_id = $1 ORDER BY week_number ASC",
    )
    .bind(activity_id)
    .fetch_all(executor)
    .await
    .context("failed to list plan weeks")?;

    Ok(weeks)
}

/// Same as [`list_plan_weeks`], but row-locks every week until the enclosing
/// transaction ends.
pub async fn list_plan_weeks_for_update<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
) -> Result<Vec<PlanWeek>> {
    let weeks = sqlx::query_as::<_, PlanWeek>(
        "SELECT * FROM plan_weeks WHERE activity_id = $1 \
         ORDER BY week_number ASC \
         FOR UPDATE",
    )
    .bind(activity_id)
    .fetch_all(executor)
    .await
    .context("failed to lock plan weeks")?;

    Ok(weeks)
}

/// Overwrite the day slots of an existing week.
pub async fn update_plan_week_days<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
    week_number: i32,
    days: &serde_json::Value,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE plan_weeks SET days = $1, updated_at = now() \
         WHERE activity_id = $2 AND week_number = $3",
    )
    .bind(days)
    .bind(activity_id)
    .bind(week_number)
    .execute(executor)
    .await
    .with_context(|| format!("failed to update plan week {week_number}"))?;

    if result.rows_affected() == 0 {
        anyhow::bail!("plan week {week_number} of activity {activity_id} not found");
    }

    Ok(())
}

/// Delete a week. Returns whether a row was removed.
pub async fn delete_plan_week<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
    week_number: i32,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM plan_weeks WHERE activity_id = $1 AND week_number = $2")
        .bind(activity_id)
        .bind(week_number)
        .execute(executor)
        .await
        .with_context(|| format!("failed to delete plan week {week_number}"))?;

    Ok(result.rows_affected() > 0)
}
