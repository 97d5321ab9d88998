//! Database query functions for the `executions` ledger.
//!
//! Ordering of a client's records is always `sequence ASC`. The sequence is
//! assigned by the expansion traversal, so it matches
//! `(period_index, week_number, day_of_week, block, order_in_block)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::ExecutionRecord;

/// A record about to be written by the expansion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecution {
    pub exercise_id: i64,
    pub exercise_name: String,
    pub period_index: i32,
    pub week_number: i32,
    pub day_of_week: i32,
    pub block: i32,
    pub order_in_block: i32,
    pub sequence: i32,
    pub applied_intensity: Option<String>,
}

/// Completed/total counts for one client's plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionProgress {
    pub completed: i64,
    pub total: i64,
}

/// Take the transaction-scoped advisory lock guarding expansion of
/// `(client_id, activity_id)`.
///
/// Released automatically on commit or rollback.
pub async fn lock_client_activity<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("expansion:{client_id}:{activity_id}"))
        .execute(executor)
        .await
        .context("failed to acquire expansion lock")?;

    Ok(())
}

/// Count the records already generated for `(client_id, activity_id)`.
pub async fn count_for_client_activity<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM executions WHERE client_id = $1 AND activity_id = $2",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_one(executor)
    .await
    .context("failed to count executions")?;

    Ok(count)
}

/// Whether the plan of `(client_id, activity_id)` has ever been expanded.
///
/// Read the marker row rather than the ledger: a purge can delete every
/// record a client has.
pub async fn expansion_recorded<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<bool> {
    let recorded: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM expansions WHERE client_id = $1 AND activity_id = $2)",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_one(executor)
    .await
    .context("failed to check expansion marker")?;

    Ok(recorded)
}

/// Write the expansion marker for `(client_id, activity_id)`.
///
/// Returns `false` if a marker already existed.
pub async fn record_expansion<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
    created: u64,
) -> Result<bool> {
    let created = i32::try_from(created).context("expansion record count out of range")?;
    let result = sqlx::query(
        "INSERT INTO expansions (client_id, activity_id, created) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (client_id, activity_id) DO NOTHING",
    )
    .bind(client_id)
    .bind(activity_id)
    .bind(created)
    .execute(executor)
    .await
    .context("failed to record expansion")?;

    Ok(result.rows_affected() > 0)
}

/// Bulk-insert a client's expanded plan in a single statement.
///
/// Returns the number of rows written.
pub async fn insert_executions<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
    records: &[NewExecution],
) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut exercise_ids = Vec::with_capacity(records.len());
    let mut exercise_names = Vec::with_capacity(records.len());
    let mut period_indexes = Vec::with_capacity(records.len());
    let mut week_numbers = Vec::with_capacity(records.len());
    let mut days = Vec::with_capacity(records.len());
    let mut blocks = Vec::with_capacity(records.len());
    let mut orders = Vec::with_capacity(records.len());
    let mut sequences = Vec::with_capacity(records.len());
    let mut intensities = Vec::with_capacity(records.len());

    for r in records {
        exercise_ids.push(r.exercise_id);
        exercise_names.push(r.exercise_name.clone());
        period_indexes.push(r.period_index);
        week_numbers.push(r.week_number);
        days.push(r.day_of_week);
        blocks.push(r.block);
        orders.push(r.order_in_block);
        sequences.push(r.sequence);
        intensities.push(r.applied_intensity.clone());
    }

    let result = sqlx::query(
        "INSERT INTO executions \
           (client_id, activity_id, exercise_id, exercise_name, period_index, week_number, \
            day_of_week, block, order_in_block, sequence, applied_intensity) \
         SELECT $1::uuid, $2::uuid, t.* FROM UNNEST( \
           $3::bigint[], $4::text[], $5::int[], $6::int[], \
           $7::int[], $8::int[], $9::int[], $10::int[], $11::text[] \
         ) AS t",
    )
    .bind(client_id)
    .bind(activity_id)
    .bind(&exercise_ids)
    .bind(&exercise_names)
    .bind(&period_indexes)
    .bind(&week_numbers)
    .bind(&days)
    .bind(&blocks)
    .bind(&orders)
    .bind(&sequences)
    .bind(&intensities)
    .execute(executor)
    .await
    .context("failed to insert executions")?;

    Ok(result.rows_affected())
}

/// Fetch a single execution by ID.
pub async fn get_execution<'e>(
    executor: impl PgExecutor<'e>,
    id: i64,
) -> Result<Option<ExecutionRecord>> {
    let record = sqlx::query_as::<_, ExecutionRecord>("SELECT * FROM executions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch execution")?;

    Ok(record)
}

/// List a client's full expanded plan in traversal order.
pub async fn list_for_client_activity<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<Vec<ExecutionRecord>> {
    let records = sqlx::query_as::<_, ExecutionRecord>(
        "SELECT * FROM executions \
         WHERE client_id = $1 AND activity_id = $2 \
         ORDER BY sequence ASC",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_all(executor)
    .await
    .context("failed to list executions")?;

    Ok(records)
}

/// The first incomplete record in traversal order, if any.
pub async fn next_pending<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<Option<ExecutionRecord>> {
    let record = sqlx::query_as::<_, ExecutionRecord>(
        "SELECT * FROM executions \
         WHERE client_id = $1 AND activity_id = $2 AND NOT completed \
         ORDER BY period_index, week_number, day_of_week, block, order_in_block, sequence \
         LIMIT 1",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch next pending execution")?;

    Ok(record)
}

/// Mark an execution completed if it is not already.
///
/// Returns the updated row, or `None` when the record does not exist or was
/// already completed (the caller distinguishes the two).
pub async fn complete_if_pending<'e>(
    executor: impl PgExecutor<'e>,
    id: i64,
    completed_at: DateTime<Utc>,
) -> Result<Option<ExecutionRecord>> {
    let record = sqlx::query_as::<_, ExecutionRecord>(
        "UPDATE executions SET completed = true, completed_at = $1 \
         WHERE id = $2 AND NOT completed \
         RETURNING *",
    )
    .bind(completed_at)
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to complete execution")?;

    Ok(record)
}

/// Completed/total counts for `(client_id, activity_id)`.
pub async fn get_progress<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<ExecutionProgress> {
    let (completed, total): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*) FILTER (WHERE completed), COUNT(*) \
         FROM executions \
         WHERE client_id = $1 AND activity_id = $2",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_one(executor)
    .await
    .context("failed to get execution progress")?;

    Ok(ExecutionProgress { completed, total })
}

/// Delete the incomplete records of `exercise_ids` within one activity.
/// Completed records are never touched.
///
/// Returns the client of every deleted record, ascending, one entry per
/// record.
pub async fn delete_pending_for_exercises<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
    exercise_ids: &[i64],
) -> Result<Vec<Uuid>> {
    let mut clients: Vec<Uuid> = sqlx::query_scalar(
        "DELETE FROM executions \
         WHERE activity_id = $1 AND exercise_id = ANY($2) AND NOT completed \
         RETURNING client_id",
    )
    .bind(activity_id)
    .bind(exercise_ids)
    .fetch_all(executor)
    .await
    .context("failed to purge pending executions")?;

    clients.sort_unstable();
    Ok(clients)
}
