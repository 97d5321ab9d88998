//! Execution ledger: progress and ordering queries over a client's expanded
//! plan, plus the completion action.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use regimen_db::models::{EnrollmentStatus, ExecutionRecord};
use regimen_db::queries::executions::{self as exec_queries, ExecutionProgress};
use regimen_db::queries::enrollments as enrollment_queries;

use crate::error::{EngineError, with_deadline};

/// Result of [`mark_completed`].
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub record: ExecutionRecord,
    /// The record was completed before this call; nothing changed.
    pub already_completed: bool,
    /// This call completed the last pending record and closed the
    /// enrollment.
    pub enrollment_completed: bool,
}

/// Completed and total record counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub completed: i64,
    pub total: i64,
}

impl From<ExecutionProgress> for ProgressSummary {
    fn from(p: ExecutionProgress) -> Self {
        Self {
            completed: p.completed,
            total: p.total,
        }
    }
}

fn check_pair(client_id: Uuid, activity_id: Uuid) -> Result<(), EngineError> {
    if client_id.is_nil() {
        return Err(EngineError::validation("client_id", "must not be nil"));
    }
    if activity_id.is_nil() {
        return Err(EngineError::validation("activity_id", "must not be nil"));
    }
    Ok(())
}

/// The first incomplete record in plan order, or `None` when the client
/// has finished (or has no records).
pub async fn next_pending(
    pool: &PgPool,
    client_id: Uuid,
    activity_id: Uuid,
    deadline: Duration,
) -> Result<Option<ExecutionRecord>, EngineError> {
    check_pair(client_id, activity_id)?;
    with_deadline(deadline, async {
        Ok::<_, EngineError>(exec_queries::next_pending(pool, client_id, activity_id).await?)
    })
    .await
}

/// Mark a record completed.
///
/// Completing an already-completed record succeeds and leaves
/// `completed_at` untouched.
pub async fn mark_completed(
    pool: &PgPool,
    execution_id: i64,
    deadline: Duration,
) -> Result<CompletionOutcome, EngineError> {
    if execution_id <= 0 {
        return Err(EngineError::validation(
            "id",
            format!("must be positive, got {execution_id}"),
        ));
    }
    with_deadline(deadline, complete_once(pool, execution_id)).await
}

async fn complete_once(pool: &PgPool, execution_id: i64) -> Result<CompletionOutcome, EngineError> {
    let mut tx = pool.begin().await?;

    let Some(record) = exec_queries::complete_if_pending(&mut *tx, execution_id, Utc::now()).await?
    else {
        let record = exec_queries::get_execution(&mut *tx, execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("execution {execution_id}")))?;
        tracing::debug!(execution_id, "execution already completed");
        return Ok(CompletionOutcome {
            record,
            already_completed: true,
            enrollment_completed: false,
        });
    };

    let enrollment_completed =
        close_if_finished(&mut *tx, record.client_id, record.activity_id).await?;

    tx.commit().await?;

    Ok(CompletionOutcome {
        record,
        already_completed: false,
        enrollment_completed,
    })
}

/// Close the enrollment of `(client_id, activity_id)` if the client has no
/// pending records left. Returns whether it was closed.
///
/// The count runs under the enrollment row lock. Concurrent completions of
/// the last records queue on that lock, and the later one sees the earlier
/// one's committed update.
pub(crate) async fn close_if_finished(
    conn: &mut PgConnection,
    client_id: Uuid,
    activity_id: Uuid,
) -> Result<bool, EngineError> {
    let Some(enrollment) =
        enrollment_queries::lock_enrollment(&mut *conn, client_id, activity_id).await?
    else {
        return Ok(false);
    };
    if enrollment.status != EnrollmentStatus::Active {
        return Ok(false);
    }

    let progress = exec_queries::get_progress(&mut *conn, client_id, activity_id).await?;
    if progress.completed < progress.total {
        return Ok(false);
    }

    let closed = enrollment_queries::complete_enrollment(&mut *conn, client_id, activity_id).await?;
    if closed {
        tracing::info!(
            client_id = %client_id,
            activity_id = %activity_id,
            completed = progress.completed,
            total = progress.total,
            "client finished plan"
        );
    }
    Ok(closed)
}

pub async fn progress_summary(
    pool: &PgPool,
    client_id: Uuid,
    activity_id: Uuid,
    deadline: Duration,
) -> Result<ProgressSummary, EngineError> {
    check_pair(client_id, activity_id)?;
    with_deadline(deadline, async {
        let progress = exec_queries::get_progress(pool, client_id, activity_id).await?;
        Ok::<_, EngineError>(ProgressSummary::from(progress))
    })
    .await
}

/// Every record of the client's plan in plan order.
pub async fn schedule(
    pool: &PgPool,
    client_id: Uuid,
    activity_id: Uuid,
    deadline: Duration,
) -> Result<Vec<ExecutionRecord>, EngineError> {
    check_pair(client_id, activity_id)?;
    with_deadline(deadline, async {
        let records =
            exec_queries::list_for_client_activity(pool, client_id, activity_id).await?;
        Ok::<_, EngineError>(records)
    })
    .await
}
