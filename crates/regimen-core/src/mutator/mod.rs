//! Plan mutator: retracting exercises from an activity.
//!
//! A retraction removes the activity from each exercise's memberships
//! (hard-deleting exercises left with none), filters the exercises out of
//! every plan week, deletes weeks left empty, and optionally purges
//! incomplete executions, closing enrollments left with nothing pending.
//! Everything happens in one transaction.
//!
//! Lock order is exercise rows in ascending ID order, then the activity's
//! plan week rows, then purged execution rows, then enrollment rows in
//! ascending client order. Two retractions that share an exercise therefore queue
//! on the exercise row instead of deadlocking.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use regimen_db::queries::{
    activities as activity_queries, executions as exec_queries, exercises as exercise_queries,
    plan_weeks as week_queries,
};

use crate::error::{EngineError, with_deadline};
use crate::ledger;
use crate::plan::{WeekPlan, decode_weeks};

/// What happens to already-generated, incomplete executions of a retracted
/// exercise. Completed executions are always kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Leave them in the ledger.
    Retain,
    /// Delete them, for the retracting activity only.
    #[default]
    PurgePending,
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::PurgePending => write!(f, "purge_pending"),
        }
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retain" => Ok(Self::Retain),
            "purge_pending" | "purge" => Ok(Self::PurgePending),
            other => Err(format!(
                "invalid orphan policy {other:?} (expected retain or purge_pending)"
            )),
        }
    }
}

/// Why one requested exercise was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotFound,
    /// The exercise (or the activity) belongs to another coach.
    NotOwned,
    /// The exercise is not part of the activity.
    NotMember,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::NotOwned => write!(f, "not_owned"),
            Self::NotMember => write!(f, "not_member"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub exercise_id: i64,
    pub reason: RejectionReason,
}

/// Result of [`remove_exercises`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetractionOutcome {
    /// Exercises actually detached from the activity.
    pub retracted: Vec<i64>,
    /// Plan entries filtered out across all weeks.
    pub removed_from_plan: usize,
    /// Exercises hard-deleted because no activity references them anymore.
    pub exercises_fully_deleted: usize,
    pub executions_purged: u64,
    /// Clients whose enrollment closed because the purge left them nothing
    /// pending.
    pub enrollments_completed: Vec<Uuid>,
    pub rejected: Vec<Rejection>,
    /// Weeks rewritten with fewer entries.
    pub touched_weeks: Vec<i32>,
    /// Weeks deleted because they became empty.
    pub deleted_weeks: Vec<i32>,
}

/// Per-week effect of filtering exercises out of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekChanges {
    pub rewrites: Vec<(i32, WeekPlan)>,
    pub deletions: Vec<i32>,
    pub removed_entries: usize,
}

impl WeekChanges {
    /// Every week number that has to be written, ascending.
    pub fn pending_weeks(&self) -> Vec<i32> {
        let mut weeks: Vec<i32> = self
            .rewrites
            .iter()
            .map(|(n, _)| *n)
            .chain(self.deletions.iter().copied())
            .collect();
        weeks.sort_unstable();
        weeks
    }
}

/// Filter `removed` out of each week. Weeks that did not reference any of
/// them are left out of the result.
pub fn filter_weeks(weeks: Vec<(i32, WeekPlan)>, removed: &HashSet<i64>) -> WeekChanges {
    let mut changes = WeekChanges::default();
    for (number, mut plan) in weeks {
        let count = plan.retain_exercises(removed);
        if count == 0 {
            continue;
        }
        changes.removed_entries += count;
        if plan.is_empty() {
            changes.deletions.push(number);
        } else {
            changes.rewrites.push((number, plan));
        }
    }
    changes
}

/// Retract `exercise_ids` from `activity_id` on behalf of `coach_id`.
///
/// Unknown, foreign, or non-member exercises are reported in
/// [`RetractionOutcome::rejected`] and do not abort the batch.
pub async fn remove_exercises(
    pool: &PgPool,
    coach_id: Uuid,
    activity_id: Uuid,
    exercise_ids: &[i64],
    policy: OrphanPolicy,
    deadline: Duration,
) -> Result<RetractionOutcome, EngineError> {
    if activity_id.is_nil() {
        return Err(EngineError::validation("activity_id", "must not be nil"));
    }
    if coach_id.is_nil() {
        return Err(EngineError::validation("coach_id", "must not be nil"));
    }
    if exercise_ids.is_empty() {
        return Err(EngineError::validation("ids", "must not be empty"));
    }
    if let Some(bad) = exercise_ids.iter().find(|id| **id <= 0) {
        return Err(EngineError::validation(
            "ids",
            format!("exercise IDs must be positive, got {bad}"),
        ));
    }

    // Ascending and deduplicated: this is the lock order.
    let ids: BTreeSet<i64> = exercise_ids.iter().copied().collect();

    with_deadline(
        deadline,
        retract(pool, coach_id, activity_id, &ids, policy),
    )
    .await
}

async fn retract(
    pool: &PgPool,
    coach_id: Uuid,
    activity_id: Uuid,
    ids: &BTreeSet<i64>,
    policy: OrphanPolicy,
) -> Result<RetractionOutcome, EngineError> {
    let mut tx = pool.begin().await?;
    let mut outcome = RetractionOutcome::default();

    let activity = activity_queries::get_activity(&mut *tx, activity_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("activity {activity_id}")))?;
    let activity_owned = activity.coach_id == coach_id;

    for &id in ids {
        let reason = match exercise_queries::get_exercise_for_update(&mut *tx, id).await? {
            None => Some(RejectionReason::NotFound),
            Some(ex) if ex.coach_id != coach_id || !activity_owned => {
                Some(RejectionReason::NotOwned)
            }
            Some(_) => {
                if exercise_queries::remove_membership(&mut *tx, id, activity_id).await? {
                    None
                } else {
                    Some(RejectionReason::NotMember)
                }
            }
        };

        if let Some(reason) = reason {
            tracing::warn!(
                exercise_id = id,
                activity_id = %activity_id,
                coach_id = %coach_id,
                reason = %reason,
                "skipping exercise retraction"
            );
            outcome.rejected.push(Rejection {
                exercise_id: id,
                reason,
            });
            continue;
        }

        outcome.retracted.push(id);
        let remaining = exercise_queries::list_memberships(&mut *tx, id).await?;
        if remaining.is_empty() {
            exercise_queries::delete_exercise(&mut *tx, id).await?;
            outcome.exercises_fully_deleted += 1;
            tracing::debug!(exercise_id = id, "deleted exercise with no remaining activities");
        }
    }

    if outcome.retracted.is_empty() {
        return Ok(outcome);
    }

    let removed: HashSet<i64> = outcome.retracted.iter().copied().collect();
    let rows = week_queries::list_plan_weeks_for_update(&mut *tx, activity_id).await?;
    let changes = filter_weeks(decode_weeks(&rows)?, &removed);
    let pending = changes.pending_weeks();

    for (number, plan) in &changes.rewrites {
        week_queries::update_plan_week_days(&mut *tx, activity_id, *number, &plan.to_json())
            .await
            .map_err(|source| partial(activity_id, &pending, source))?;
    }
    for number in &changes.deletions {
        week_queries::delete_plan_week(&mut *tx, activity_id, *number)
            .await
            .map_err(|source| partial(activity_id, &pending, source))?;
    }

    outcome.removed_from_plan = changes.removed_entries;
    outcome.touched_weeks = changes.rewrites.iter().map(|(n, _)| *n).collect();
    outcome.deleted_weeks = changes.deletions;

    if policy == OrphanPolicy::PurgePending {
        let mut clients =
            exec_queries::delete_pending_for_exercises(&mut *tx, activity_id, &outcome.retracted)
                .await?;
        outcome.executions_purged = clients.len() as u64;

        // A purge can remove a client's last pending records.
        clients.dedup();
        for client_id in clients {
            if ledger::close_if_finished(&mut *tx, client_id, activity_id).await? {
                outcome.enrollments_completed.push(client_id);
            }
        }
    }

    tx.commit()
        .await
        .context("failed to commit retraction")
        .map_err(|source| partial(activity_id, &pending, source))?;

    tracing::info!(
        activity_id = %activity_id,
        retracted = outcome.retracted.len(),
        rejected = outcome.rejected.len(),
        removed_from_plan = outcome.removed_from_plan,
        exercises_deleted = outcome.exercises_fully_deleted,
        executions_purged = outcome.executions_purged,
        enrollments_completed = outcome.enrollments_completed.len(),
        touched_weeks = ?outcome.touched_weeks,
        deleted_weeks = ?outcome.deleted_weeks,
        "retracted exercises"
    );

    Ok(outcome)
}

/// The transaction is rolled back, so every week in `pending` still needs
/// its rewrite.
fn partial(activity_id: Uuid, pending: &[i32], source: anyhow::Error) -> EngineError {
    tracing::error!(
        activity_id = %activity_id,
        weeks = ?pending,
        error = %source,
        "plan week write failed, retraction rolled back"
    );
    EngineError::PartialRetraction {
        unpersisted_weeks: pending.to_vec(),
        source,
    }
}
