//! Enrollment gateway: records a client's purchase of an activity and
//! triggers expansion of the plan.

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use regimen_db::models::Enrollment;
use regimen_db::queries::{activities as activity_queries, enrollments as enrollment_queries};

use crate::error::{EngineError, with_deadline};
use crate::expansion;

/// Result of [`enroll`].
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentOutcome {
    pub enrollment: Enrollment,
    /// Execution records generated by this call. `0` when the plan was
    /// already expanded for this client.
    pub created: u64,
}

/// Enroll `client_id` in `activity_id`, then expand the plan.
///
/// A repeated call (a retried payment callback) returns the same enrollment
/// and creates no further records. If expansion fails the enrollment row
/// stays, so calling again retries expansion.
pub async fn enroll(
    pool: &PgPool,
    client_id: Uuid,
    activity_id: Uuid,
    deadline: Duration,
) -> Result<EnrollmentOutcome, EngineError> {
    if client_id.is_nil() {
        return Err(EngineError::validation("client_id", "must not be nil"));
    }
    if activity_id.is_nil() {
        return Err(EngineError::validation("activity_id", "must not be nil"));
    }

    let enrollment = with_deadline(deadline, async {
        if activity_queries::get_activity(pool, activity_id).await?.is_none() {
            return Err(EngineError::validation(
                "activity_id",
                format!("activity {activity_id} does not exist"),
            ));
        }
        let enrollment = enrollment_queries::upsert_enrollment(pool, client_id, activity_id).await?;
        Ok::<_, EngineError>(enrollment)
    })
    .await?;

    tracing::info!(
        enrollment_id = %enrollment.id,
        client_id = %client_id,
        activity_id = %activity_id,
        "enrollment recorded"
    );

    let created = expansion::expand(pool, client_id, activity_id, deadline).await?;

    Ok(EnrollmentOutcome {
        enrollment,
        created,
    })
}
