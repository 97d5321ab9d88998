//! Database query functions for the `enrollments` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Enrollment, EnrollmentStatus};

/// Insert an enrollment for `(client_id, activity_id)`, or return the
/// existing one.
///
/// A payment callback that fires twice therefore yields the same enrollment
/// ID both times.
pub async fn upsert_enrollment<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<Enrollment> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "INSERT INTO enrollments (client_id, activity_id) \
         VALUES ($1, $2) \
         ON CONFLICT (client_id, activity_id) \
         DO UPDATE SET client_id = EXCLUDED.client_id \
         RETURNING *",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_one(executor)
    .await
    .context("failed to upsert enrollment")?;

    Ok(enrollment)
}

/// Fetch an enrollment by its ID.
pub async fn get_enrollment<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch enrollment")?;

    Ok(enrollment)
}

/// List every enrollment of an activity, oldest first.
pub async fn list_enrollments_for_activity<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
) -> Result<Vec<Enrollment>> {
    let enrollments = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE activity_id = $1 ORDER BY created_at ASC",
    )
    .bind(activity_id)
    .fetch_all(executor)
    .await
    .context("failed to list enrollments for activity")?;

    Ok(enrollments)
}

/// Lock the enrollment of `(client_id, activity_id)` for the rest of the
/// transaction. Completion checks run under this lock so that two
/// transactions finishing the last records cannot both miss the close.
pub async fn lock_enrollment<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE client_id = $1 AND activity_id = $2 FOR UPDATE",
    )
    .bind(client_id)
    .bind(activity_id)
    .fetch_optional(executor)
    .await
    .context("failed to lock enrollment")?;

    Ok(enrollment)
}

/// Move the active enrollment of `(client_id, activity_id)` to
/// `completed`. Returns whether a row changed.
pub async fn complete_enrollment<'e>(
    executor: impl PgExecutor<'e>,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE enrollments SET status = $1 \
         WHERE client_id = $2 AND activity_id = $3 AND status = $4",
    )
    .bind(EnrollmentStatus::Completed)
    .bind(client_id)
    .bind(activity_id)
    .bind(EnrollmentStatus::Active)
    .execute(executor)
    .await
    .context("failed to complete enrollment")?;

    Ok(result.rows_affected() > 0)
}
