//! Database query functions for the `exercises` and `exercise_activities`
//! tables.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Exercise, ExerciseMembership, ExerciseType, MembershipMap};

/// Fields for a new exercise definition.
#[derive(Debug, Clone)]
pub struct NewExercise<'a> {
    pub coach_id: Uuid,
    pub name: &'a str,
    pub exercise_type: ExerciseType,
    pub base_intensity: Option<&'a str>,
}

/// Insert a new exercise. The exercise has no memberships until
/// [`add_membership`] is called, so callers should do both in one
/// transaction.
pub async fn insert_exercise<'e>(
    executor: impl PgExecutor<'e>,
    new: &NewExercise<'_>,
) -> Result<Exercise> {
    let exercise = sqlx::query_as::<_, Exercise>(
        "INSERT INTO exercises (coach_id, name, exercise_type, base_intensity) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(new.coach_id)
    .bind(new.name)
    .bind(new.exercise_type)
    .bind(new.base_intensity)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert exercise {:?}", new.name))?;

    Ok(exercise)
}

/// Fetch a single exercise by ID.
pub async fn get_exercise<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<Option<Exercise>> {
    let exercise = sqlx::query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch exercise")?;

    Ok(exercise)
}

/// Fetch an exercise and hold a row lock on it until the transaction ends.
///
/// Every membership mutation goes through this lock, so concurrent
/// retractions touching the same shared exercise are serialized.
pub async fn get_exercise_for_update<'e>(
    executor: impl PgExecutor<'e>,
    id: i64,
) -> Result<Option<Exercise>> {
    let exercise =
        sqlx::query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
            .with_context(|| format!("failed to lock exercise {id}"))?;

    Ok(exercise)
}

/// Fetch every exercise whose ID is in `ids`. Missing IDs are simply absent
/// from the result.
pub async fn get_exercises_by_ids<'e>(
    executor: impl PgExecutor<'e>,
    ids: &[i64],
) -> Result<Vec<Exercise>> {
    let exercises =
        sqlx::query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = ANY($1) ORDER BY id")
            .bind(ids)
            .fetch_all(executor)
            .await
            .context("failed to fetch exercises by id")?;

    Ok(exercises)
}

/// List the exercises that are members of an activity.
pub async fn list_exercises_for_activity<'e>(
    executor: impl PgExecutor<'e>,
    activity_id: Uuid,
) -> Result<Vec<Exercise>> {
    let exercises = sqlx::query_as::<_, Exercise>(
        "SELECT e.* FROM exercises e \
         JOIN exercise_activities ea ON ea.exercise_id = e.id \
         WHERE ea.activity_id = $1 \
         ORDER BY e.id",
    )
    .bind(activity_id)
    .fetch_all(executor)
    .await
    .context("failed to list exercises for activity")?;

    Ok(exercises)
}

/// Delete an exercise outright. Returns whether a row was removed.
pub async fn delete_exercise<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM exercises WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to delete exercise {id}"))?;

    Ok(result.rows_affected() > 0)
}

// -----------------------------------------------------------------------
// Membership
// -----------------------------------------------------------------------

/// Record that `exercise_id` is part of `activity_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn add_membership<'e>(
    executor: impl PgExecutor<'e>,
    exercise_id: i64,
    activity_id: Uuid,
    metadata: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO exercise_activities (exercise_id, activity_id, metadata) \
         VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(exercise_id)
    .bind(activity_id)
    .bind(metadata)
    .execute(executor)
    .await
    .with_context(|| format!("failed to add exercise {exercise_id} to activity {activity_id}"))?;

    Ok(())
}

/// Remove one membership. Returns whether the membership existed.
pub async fn remove_membership<'e>(
    executor: impl PgExecutor<'e>,
    exercise_id: i64,
    activity_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM exercise_activities WHERE exercise_id = $1 AND activity_id = $2",
    )
    .bind(exercise_id)
    .bind(activity_id)
    .execute(executor)
    .await
    .with_context(|| {
        format!("failed to remove exercise {exercise_id} from activity {activity_id}")
    })?;

    Ok(result.rows_affected() > 0)
}

/// List the membership rows of one exercise, ordered by activity ID.
pub async fn list_memberships<'e>(
    executor: impl PgExecutor<'e>,
    exercise_id: i64,
) -> Result<Vec<ExerciseMembership>> {
    let rows = sqlx::query_as::<_, ExerciseMembership>(
        "SELECT * FROM exercise_activities WHERE exercise_id = $1 ORDER BY activity_id",
    )
    .bind(exercise_id)
    .fetch_all(executor)
    .await
    .context("failed to list exercise memberships")?;

    Ok(rows)
}

/// The membership map of one exercise: `activity_id -> metadata`.
pub async fn get_membership_map<'e>(
    executor: impl PgExecutor<'e>,
    exercise_id: i64,
) -> Result<MembershipMap> {
    let rows = list_memberships(executor, exercise_id).await?;
    Ok(rows
        .into_iter()
        .map(|m| (m.activity_id, m.metadata))
        .collect())
}
