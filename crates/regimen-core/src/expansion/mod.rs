//! Expansion engine: turns an activity's plan into a client's execution
//! records.
//!
//! Expansion runs once per `(client, activity)`. The marker check, the bulk
//! insert and the marker write share one transaction, serialized per pair by
//! an advisory lock, so duplicate enrollment events generate the plan
//! exactly once.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use regimen_db::models::Exercise;
use regimen_db::queries::executions::{self as exec_queries, NewExecution};
use regimen_db::queries::exercises as exercise_queries;

use crate::error::{EngineError, with_deadline};
use crate::plan::{WeekPlan, load_activity_plan};

/// Generate the execution records for `client_id` in `activity_id`.
///
/// Returns how many records were created. Returns `0` without writing
/// anything if the plan was already expanded for this client, even when
/// retractions have since purged every record.
pub async fn expand(
    pool: &PgPool,
    client_id: Uuid,
    activity_id: Uuid,
    deadline: Duration,
) -> Result<u64, EngineError> {
    if client_id.is_nil() {
        return Err(EngineError::validation("client_id", "must not be nil"));
    }
    if activity_id.is_nil() {
        return Err(EngineError::validation("activity_id", "must not be nil"));
    }
    with_deadline(deadline, expand_once(pool, client_id, activity_id)).await
}

async fn expand_once(pool: &PgPool, client_id: Uuid, activity_id: Uuid) -> Result<u64, EngineError> {
    let mut tx = pool.begin().await?;

    exec_queries::lock_client_activity(&mut *tx, client_id, activity_id).await?;
    if exec_queries::expansion_recorded(&mut *tx, client_id, activity_id).await? {
        tracing::debug!(
            client_id = %client_id,
            activity_id = %activity_id,
            "plan already expanded, skipping"
        );
        return Ok(0);
    }

    let plan = match load_activity_plan(&mut *tx, activity_id).await {
        Err(EngineError::NotFound { what }) => {
            return Err(EngineError::validation("activity_id", format!("{what} does not exist")));
        }
        other => other?,
    };
    if plan.weeks.is_empty() {
        return Err(EngineError::validation(
            "activity_id",
            format!("activity {activity_id} has no plan weeks"),
        ));
    }

    let ids: Vec<i64> = plan
        .weeks
        .iter()
        .flat_map(|(_, week)| week.exercise_ids())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    let exercises: HashMap<i64, Exercise> = exercise_queries::get_exercises_by_ids(&mut *tx, &ids)
        .await?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

    let records = match build_schedule(plan.period_count, &plan.weeks, &exercises) {
        Ok(records) => records,
        Err(err) => {
            tracing::error!(activity_id = %activity_id, error = %err, "cannot expand plan");
            return Err(err);
        }
    };
    if records.is_empty() {
        tracing::error!(activity_id = %activity_id, "plan weeks produced no executions");
        return Err(EngineError::InvariantViolation(format!(
            "activity {activity_id} has {} plan weeks but no exercises",
            plan.weeks.len()
        )));
    }

    let created = exec_queries::insert_executions(&mut *tx, client_id, activity_id, &records).await?;
    if created != records.len() as u64 {
        return Err(EngineError::InvariantViolation(format!(
            "inserted {created} of {} executions",
            records.len()
        )));
    }

    if !exec_queries::record_expansion(&mut *tx, client_id, activity_id, created).await? {
        return Err(EngineError::InvariantViolation(format!(
            "expansion marker for client {client_id} in activity {activity_id} appeared under lock"
        )));
    }

    tx.commit().await?;

    tracing::info!(
        client_id = %client_id,
        activity_id = %activity_id,
        periods = plan.period_count,
        weeks = plan.weeks.len(),
        created,
        "expanded plan"
    );

    Ok(created)
}

/// Build the ordered execution records for a plan.
///
/// Traversal: period, week number, day Monday..Sunday, block ascending,
/// `order` ascending. `sequence` numbers the records from 1 in that order.
/// Intensity is copied from each exercise as it is now.
pub fn build_schedule(
    period_count: i32,
    weeks: &[(i32, WeekPlan)],
    exercises: &HashMap<i64, Exercise>,
) -> Result<Vec<NewExecution>, EngineError> {
    if period_count < 1 {
        return Err(EngineError::InvariantViolation(format!(
            "period count must be at least 1, got {period_count}"
        )));
    }

    let mut sorted: Vec<&(i32, WeekPlan)> = weeks.iter().collect();
    sorted.sort_by_key(|(number, _)| *number);

    let mut records = Vec::new();
    let mut sequence: i32 = 0;
    for period_index in 1..=period_count {
        for (week_number, week) in &sorted {
            for (day, block, entry) in week.ordered_entries() {
                let exercise = exercises.get(&entry.exercise_id).ok_or_else(|| {
                    EngineError::InvariantViolation(format!(
                        "week {week_number} {day} block {block} references missing exercise {}",
                        entry.exercise_id
                    ))
                })?;
                sequence = sequence.checked_add(1).ok_or_else(|| {
                    EngineError::InvariantViolation("execution sequence overflow".to_string())
                })?;
                records.push(NewExecution {
                    exercise_id: exercise.id,
                    exercise_name: exercise.name.clone(),
                    period_index,
                    week_number: *week_number,
                    day_of_week: day.iso_number(),
                    block,
                    order_in_block: entry.order,
                    sequence,
                    applied_intensity: exercise.intensity_snapshot(),
                });
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use regimen_db::models::{ExerciseType, REST_INTENSITY};
    use serde_json::json;

    use super::*;

    fn exercise(id: i64, exercise_type: ExerciseType, intensity: Option<&str>) -> Exercise {
        Exercise {
            id,
            coach_id: Uuid::new_v4(),
            name: format!("exercise {id}"),
            exercise_type,
            base_intensity: intensity.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    fn catalog(items: Vec<Exercise>) -> HashMap<i64, Exercise> {
        items.into_iter().map(|e| (e.id, e)).collect()
    }

    fn week(value: serde_json::Value) -> WeekPlan {
        WeekPlan::from_json(&value).unwrap()
    }

    fn positions(records: &[NewExecution]) -> Vec<(i32, i32, i32, i32, i32, i64)> {
        records
            .iter()
            .map(|r| {
                (
                    r.period_index,
                    r.week_number,
                    r.day_of_week,
                    r.block,
                    r.order_in_block,
                    r.exercise_id,
                )
            })
            .collect()
    }

    #[test]
    fn two_periods_repeat_the_week_in_order() {
        let weeks = vec![(
            1,
            week(json!({"monday": {"1": [{"id": 10, "order": 1}, {"id": 11, "order": 2}]}})),
        )];
        let exercises = catalog(vec![
            exercise(10, ExerciseType::Strength, Some("RPE 8")),
            exercise(11, ExerciseType::Cardio, None),
        ]);

        let records = build_schedule(2, &weeks, &exercises).unwrap();
        assert_eq!(
            positions(&records),
            vec![
                (1, 1, 1, 1, 1, 10),
                (1, 1, 1, 1, 2, 11),
                (2, 1, 1, 1, 1, 10),
                (2, 1, 1, 1, 2, 11),
            ]
        );
        let sequences: Vec<i32> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(records[0].applied_intensity.as_deref(), Some("RPE 8"));
        assert_eq!(records[1].applied_intensity, None);
    }

    #[test]
    fn record_count_is_periods_times_entries() {
        let weeks = vec![
            (
                2,
                week(json!({"friday": {"1": [7]}, "tuesday": {"3": [7, 8], "1": [8]}})),
            ),
            (1, week(json!({"sunday": {"2": [8]}}))),
        ];
        let exercises = catalog(vec![
            exercise(7, ExerciseType::Mobility, None),
            exercise(8, ExerciseType::Strength, None),
        ]);

        let records = build_schedule(3, &weeks, &exercises).unwrap();
        assert_eq!(records.len(), 3 * 5);

        // Week 1 comes first even though it was listed second.
        let first_period: Vec<(i32, i32, i32)> = records[..5]
            .iter()
            .map(|r| (r.week_number, r.day_of_week, r.block))
            .collect();
        assert_eq!(
            first_period,
            vec![(1, 7, 2), (2, 2, 1), (2, 2, 3), (2, 2, 3), (2, 5, 1)]
        );
        assert_eq!(records[5].period_index, 2);
    }

    #[test]
    fn order_field_wins_over_list_position() {
        let weeks = vec![(
            1,
            week(json!({"wednesday": {"1": [{"id": 2, "order": 5}, {"id": 1, "order": 1}]}})),
        )];
        let exercises = catalog(vec![
            exercise(1, ExerciseType::Strength, None),
            exercise(2, ExerciseType::Strength, None),
        ]);

        let records = build_schedule(1, &weeks, &exercises).unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.exercise_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn rest_exercises_snapshot_the_rest_marker() {
        let weeks = vec![(1, week(json!({"saturday": {"1": [3]}})))];
        let exercises = catalog(vec![exercise(3, ExerciseType::Rest, Some("RPE 2"))]);

        let records = build_schedule(1, &weeks, &exercises).unwrap();
        assert_eq!(records[0].applied_intensity.as_deref(), Some(REST_INTENSITY));
        assert_eq!(records[0].exercise_name, "exercise 3");
    }

    #[test]
    fn missing_exercise_is_an_invariant_violation() {
        let weeks = vec![(1, week(json!({"monday": {"1": [99]}})))];
        let err = build_schedule(1, &weeks, &HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)), "{err}");
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn zero_periods_rejected() {
        let weeks = vec![(1, week(json!({"monday": {"1": [1]}})))];
        let exercises = catalog(vec![exercise(1, ExerciseType::Strength, None)]);
        assert!(build_schedule(0, &weeks, &exercises).is_err());
    }
}
