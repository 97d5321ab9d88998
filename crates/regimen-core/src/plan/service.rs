//! Plan service layer.
//!
//! Imports a parsed TOML plan (activity row, period spec, exercises,
//! memberships, plan weeks) within a single database transaction, and loads
//! an activity's plan back as typed [`WeekPlan`]s.
//!
//! Nothing in this module writes to the executions ledger.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result, bail};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use regimen_db::models::{Activity, ExerciseType, PlanWeek};
use regimen_db::queries::{
    activities as activity_queries, exercises as exercise_queries, plan_weeks as week_queries,
};

use super::parser::parse_block_key;
use super::slots::{ExerciseRef, WeekPlan};
use super::toml_format::{ActivityMeta, ExerciseToml, PlanToml, WeekToml};
use crate::error::EngineError;

/// Period count used when an activity has no period spec row.
pub const DEFAULT_PERIOD_COUNT: i32 = 1;

/// Summary of a successful [`import_plan`].
#[derive(Debug, Clone)]
pub struct ImportedPlan {
    pub activity: Activity,
    pub period_count: i32,
    /// Plan-file key -> exercise ID.
    pub exercise_ids: BTreeMap<String, i64>,
    pub weeks: usize,
    pub entries: usize,
}

/// An activity with its decoded plan.
#[derive(Debug, Clone)]
pub struct ActivityPlan {
    pub activity: Activity,
    pub period_count: i32,
    /// `(week_number, plan)` in ascending week order.
    pub weeks: Vec<(i32, WeekPlan)>,
}

impl ActivityPlan {
    /// Number of `(week, day, block, exercise)` tuples across all weeks.
    pub fn entry_count(&self) -> usize {
        self.weeks.iter().map(|(_, w)| w.entry_count()).sum()
    }
}

/// Create an activity and its whole plan from a parsed and validated
/// [`PlanToml`].
///
/// All rows are written inside one transaction. Shared exercises
/// (`existing_id`) must already exist; if any is missing the transaction is
/// rolled back.
pub async fn import_plan(pool: &PgPool, plan_toml: &PlanToml) -> Result<ImportedPlan> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let meta = &plan_toml.activity;
    let activity =
        activity_queries::insert_activity(&mut *tx, meta.coach_id, meta.title.trim()).await?;
    activity_queries::upsert_period_spec(&mut *tx, activity.id, meta.periods).await?;

    // Exercises: create new ones, link shared ones.
    let mut exercise_ids: BTreeMap<String, i64> = BTreeMap::new();
    let mut missing: Vec<String> = Vec::new();

    for ex in &plan_toml.exercises {
        let id = match ex.existing_id {
            Some(existing) => {
                if exercise_queries::get_exercise(&mut *tx, existing)
                    .await?
                    .is_none()
                {
                    missing.push(format!(
                        "exercise {existing} (key {:?}) does not exist",
                        ex.key
                    ));
                    continue;
                }
                existing
            }
            None => {
                let new = new_exercise(meta.coach_id, ex)?;
                exercise_queries::insert_exercise(&mut *tx, &new).await?.id
            }
        };
        exercise_queries::add_membership(&mut *tx, id, activity.id, &serde_json::json!({}))
            .await?;
        exercise_ids.insert(ex.key.clone(), id);
    }

    if !missing.is_empty() {
        // Transaction rolls back on drop.
        bail!(
            "plan references unknown exercises:\n  {}",
            missing.join("\n  ")
        );
    }

    let mut entries = 0usize;
    for week in &plan_toml.weeks {
        let plan = week_plan_from_toml(week, &exercise_ids)?;
        entries += plan.entry_count();
        week_queries::upsert_plan_week(&mut *tx, activity.id, week.number, &plan.to_json())
            .await?;
    }

    tx.commit().await.context("failed to commit transaction")?;

    tracing::info!(
        activity_id = %activity.id,
        weeks = plan_toml.weeks.len(),
        entries,
        "imported plan"
    );

    Ok(ImportedPlan {
        activity,
        period_count: meta.periods,
        exercise_ids,
        weeks: plan_toml.weeks.len(),
        entries,
    })
}

fn new_exercise<'a>(
    coach_id: Uuid,
    ex: &'a ExerciseToml,
) -> Result<exercise_queries::NewExercise<'a>> {
    let name = ex
        .name
        .as_deref()
        .with_context(|| format!("exercise {:?} has no name", ex.key))?;
    let exercise_type: ExerciseType = ex
        .exercise_type
        .as_deref()
        .with_context(|| format!("exercise {:?} has no type", ex.key))?
        .parse()?;
    Ok(exercise_queries::NewExercise {
        coach_id,
        name,
        exercise_type,
        base_intensity: ex.intensity.as_deref(),
    })
}

/// Convert one `[[weeks]]` entry into a typed week, resolving exercise keys.
/// Order within a block is the 1-based list position.
pub fn week_plan_from_toml(week: &WeekToml, ids: &BTreeMap<String, i64>) -> Result<WeekPlan> {
    let mut plan = WeekPlan::new();
    for (day, blocks) in &week.days {
        for (block_key, keys) in blocks {
            let block = parse_block_key(block_key).with_context(|| {
                format!("week {} {day}: invalid block {block_key:?}", week.number)
            })?;
            for (idx, key) in keys.iter().enumerate() {
                let exercise_id = *ids.get(key).with_context(|| {
                    format!("week {} {day}: unknown exercise {key:?}", week.number)
                })?;
                let order = i32::try_from(idx + 1).context("block too large")?;
                plan.day_mut(*day).push(block, ExerciseRef { exercise_id, order });
            }
        }
    }
    Ok(plan)
}

/// Decode stored week rows into typed plans.
///
/// A malformed row is a validation error whose field path names the week.
pub fn decode_weeks(rows: &[PlanWeek]) -> Result<Vec<(i32, WeekPlan)>, EngineError> {
    rows.iter()
        .map(|row| {
            WeekPlan::from_json(&row.days)
                .map(|plan| (row.week_number, plan))
                .map_err(|e| {
                    EngineError::validation(format!("weeks.{}.{}", row.week_number, e.path), e.message)
                })
        })
        .collect()
}

/// Load an activity, its period count (defaulting to 1) and its decoded
/// weeks on one connection.
pub async fn load_activity_plan(
    conn: &mut PgConnection,
    activity_id: Uuid,
) -> Result<ActivityPlan, EngineError> {
    let activity = activity_queries::get_activity(&mut *conn, activity_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("activity {activity_id}")))?;
    let period_count = activity_queries::get_period_count(&mut *conn, activity_id)
        .await?
        .unwrap_or(DEFAULT_PERIOD_COUNT);
    let rows = week_queries::list_plan_weeks(&mut *conn, activity_id).await?;
    let weeks = decode_weeks(&rows)?;

    Ok(ActivityPlan {
        activity,
        period_count,
        weeks,
    })
}

/// Replace one week of an activity's plan.
///
/// Every referenced exercise must be a member of the activity. An empty
/// week is deleted rather than stored. Returns `true` if a row remains.
pub async fn put_plan_week(
    pool: &PgPool,
    activity_id: Uuid,
    week_number: i32,
    plan: &WeekPlan,
) -> Result<bool, EngineError> {
    if week_number < 1 {
        return Err(EngineError::validation(
            "week_number",
            format!("must be at least 1, got {week_number}"),
        ));
    }

    let mut tx = pool.begin().await?;

    if activity_queries::get_activity(&mut *tx, activity_id)
        .await?
        .is_none()
    {
        return Err(EngineError::not_found(format!("activity {activity_id}")));
    }

    let members: HashSet<i64> = exercise_queries::list_exercises_for_activity(&mut *tx, activity_id)
        .await?
        .into_iter()
        .map(|e| e.id)
        .collect();
    if let Some(stray) = plan.exercise_ids().into_iter().find(|id| !members.contains(id)) {
        return Err(EngineError::validation(
            format!("weeks.{week_number}.days"),
            format!("exercise {stray} is not part of activity {activity_id}"),
        ));
    }

    let kept = if plan.is_empty() {
        week_queries::delete_plan_week(&mut *tx, activity_id, week_number).await?;
        false
    } else {
        week_queries::upsert_plan_week(&mut *tx, activity_id, week_number, &plan.to_json())
            .await?;
        true
    };

    tx.commit().await.context("failed to commit transaction")?;
    Ok(kept)
}

/// Render an activity's stored plan as plan TOML.
///
/// Exercises are written as `existing_id` entries keyed `e<id>`, so the
/// output can be imported again as a new activity sharing the same
/// exercises.
pub async fn materialize_plan(pool: &PgPool, activity_id: Uuid) -> Result<String, EngineError> {
    let mut conn = pool.acquire().await?;
    let plan = load_activity_plan(&mut conn, activity_id).await?;
    let exercises = exercise_queries::list_exercises_for_activity(&mut *conn, activity_id).await?;

    let key = |id: i64| format!("e{id}");
    let plan_toml = PlanToml {
        activity: ActivityMeta {
            id: Some(plan.activity.id),
            title: plan.activity.title.clone(),
            coach_id: plan.activity.coach_id,
            periods: plan.period_count,
        },
        exercises: exercises
            .iter()
            .map(|e| ExerciseToml {
                key: key(e.id),
                existing_id: Some(e.id),
                name: Some(e.name.clone()),
                exercise_type: Some(e.exercise_type.to_string()),
                intensity: e.base_intensity.clone(),
            })
            .collect(),
        weeks: plan
            .weeks
            .iter()
            .map(|(number, week)| WeekToml {
                number: *number,
                days: week
                    .days()
                    .filter(|(_, slot)| !slot.is_empty())
                    .map(|(day, slot)| {
                        let mut blocks: BTreeMap<String, Vec<String>> = BTreeMap::new();
                        for (block, entry) in slot.ordered_entries() {
                            blocks
                                .entry(block.to_string())
                                .or_default()
                                .push(key(entry.exercise_id));
                        }
                        (day, blocks)
                    })
                    .collect(),
            })
            .collect(),
    };

    toml::to_string_pretty(&plan_toml)
        .context("failed to serialize plan")
        .map_err(EngineError::from)
}
