//! Integration tests for plan expansion against a real PostgreSQL database.
//!
//! Each test creates an isolated temporary database through
//! `regimen-test-utils`.

use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use regimen_core::EngineError;
use regimen_core::expansion::expand;
use regimen_core::ledger;
use regimen_db::models::{ExerciseType, REST_INTENSITY};
use regimen_db::queries::exercises::{self as exercise_db, NewExercise};
use regimen_db::queries::{activities as activity_db, executions as exec_db, plan_weeks as week_db};
use regimen_test_utils::{create_test_db, drop_test_db};

const DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn create_activity(pool: &PgPool, coach_id: Uuid) -> Uuid {
    activity_db::insert_activity(pool, coach_id, "Strength base")
        .await
        .expect("insert activity")
        .id
}

async fn create_exercise(
    pool: &PgPool,
    coach_id: Uuid,
    activity_id: Uuid,
    name: &str,
    exercise_type: ExerciseType,
    intensity: Option<&str>,
) -> i64 {
    let ex = exercise_db::insert_exercise(
        pool,
        &NewExercise {
            coach_id,
            name,
            exercise_type,
            base_intensity: intensity,
        },
    )
    .await
    .expect("insert exercise");
    exercise_db::add_membership(pool, ex.id, activity_id, &json!({}))
        .await
        .expect("add membership");
    ex.id
}

/// One week, two periods, Monday block 1 = [a, b].
async fn two_period_fixture(pool: &PgPool) -> (Uuid, i64, i64) {
    let coach = Uuid::new_v4();
    let activity = create_activity(pool, coach).await;
    let a = create_exercise(pool, coach, activity, "Squat", ExerciseType::Strength, Some("RPE 8")).await;
    let b = create_exercise(pool, coach, activity, "Row", ExerciseType::Cardio, Some("zone 2")).await;
    activity_db::upsert_period_spec(pool, activity, 2).await.unwrap();
    week_db::upsert_plan_week(
        pool,
        activity,
        1,
        &json!({"monday": {"1": [{"id": a, "order": 1}, {"id": b, "order": 2}]}}),
    )
    .await
    .unwrap();
    (activity, a, b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expands_two_periods_in_traversal_order() {
    let (pool, db_name) = create_test_db().await;
    let (activity, a, b) = two_period_fixture(&pool).await;
    let client = Uuid::new_v4();

    let created = expand(&pool, client, activity, DEADLINE).await.unwrap();
    assert_eq!(created, 4);

    let records = exec_db::list_for_client_activity(&pool, client, activity)
        .await
        .unwrap();
    let shape: Vec<(i32, i32, i32, i32, i32, i64)> = records
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
        .collect();
    assert_eq!(
        shape,
        vec![
            (1, 1, 1, 1, 1, a),
            (1, 1, 1, 1, 2, b),
            (2, 1, 1, 1, 1, a),
            (2, 1, 1, 1, 2, b),
        ]
    );
    assert!(records.iter().all(|r| !r.completed && r.completed_at.is_none()));
    assert_eq!(records[0].applied_intensity.as_deref(), Some("RPE 8"));
    assert_eq!(records[1].exercise_name, "Row");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn second_expansion_is_a_noop() {
    let (pool, db_name) = create_test_db().await;
    let (activity, _, _) = two_period_fixture(&pool).await;
    let client = Uuid::new_v4();

    assert_eq!(expand(&pool, client, activity, DEADLINE).await.unwrap(), 4);
    let before = exec_db::list_for_client_activity(&pool, client, activity)
        .await
        .unwrap();

    assert_eq!(expand(&pool, client, activity, DEADLINE).await.unwrap(), 0);
    let after = exec_db::list_for_client_activity(&pool, client, activity)
        .await
        .unwrap();

    let ids = |rs: &[regimen_db::models::ExecutionRecord]| -> Vec<i64> {
        rs.iter().map(|r| r.id).collect()
    };
    assert_eq!(ids(&before), ids(&after));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_duplicate_expansions_generate_once() {
    let (pool, db_name) = create_test_db().await;
    let (activity, _, _) = two_period_fixture(&pool).await;
    let client = Uuid::new_v4();

    let (first, second, third) = tokio::join!(
        expand(&pool, client, activity, DEADLINE),
        expand(&pool, client, activity, DEADLINE),
        expand(&pool, client, activity, DEADLINE),
    );
    let mut created = vec![first.unwrap(), second.unwrap(), third.unwrap()];
    created.sort_unstable();
    assert_eq!(created, vec![0, 0, 4]);

    let count = exec_db::count_for_client_activity(&pool, client, activity)
        .await
        .unwrap();
    assert_eq!(count, 4);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn clients_are_expanded_independently() {
    let (pool, db_name) = create_test_db().await;
    let (activity, _, _) = two_period_fixture(&pool).await;

    let c1 = Uuid::new_v4();
    let c2 = Uuid::new_v4();
    assert_eq!(expand(&pool, c1, activity, DEADLINE).await.unwrap(), 4);
    assert_eq!(expand(&pool, c2, activity, DEADLINE).await.unwrap(), 4);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn count_is_periods_times_entries_across_weeks() {
    let (pool, db_name) = create_test_db().await;
    let coach = Uuid::new_v4();
    let activity = create_activity(&pool, coach).await;
    let a = create_exercise(&pool, coach, activity, "Lunge", ExerciseType::Strength, None).await;
    let b = create_exercise(&pool, coach, activity, "Stretch", ExerciseType::Mobility, None).await;
    activity_db::upsert_period_spec(&pool, activity, 3).await.unwrap();
    // Mixed bare and object entries, Spanish day keys.
    week_db::upsert_plan_week(
        &pool,
        activity,
        1,
        &json!({"lunes": {"1": [a, b]}, "jueves": {"2": [{"id": b}]}}),
    )
    .await
    .unwrap();
    week_db::upsert_plan_week(&pool, activity, 2, &json!({"sunday": {"1": [a], "4": [b, a]}}))
        .await
        .unwrap();

    let created = expand(&pool, Uuid::new_v4(), activity, DEADLINE)
        .await
        .unwrap();
    assert_eq!(created, 3 * 6);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn missing_period_spec_defaults_to_one_period() {
    let (pool, db_name) = create_test_db().await;
    let coach = Uuid::new_v4();
    let activity = create_activity(&pool, coach).await;
    let a = create_exercise(&pool, coach, activity, "Swim", ExerciseType::Cardio, None).await;
    week_db::upsert_plan_week(&pool, activity, 1, &json!({"tuesday": {"1": [a]}}))
        .await
        .unwrap();

    let created = expand(&pool, Uuid::new_v4(), activity, DEADLINE)
        .await
        .unwrap();
    assert_eq!(created, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn intensity_is_snapshotted_at_generation() {
    let (pool, db_name) = create_test_db().await;
    let coach = Uuid::new_v4();
    let activity = create_activity(&pool, coach).await;
    let lift = create_exercise(&pool, coach, activity, "Press", ExerciseType::Strength, Some("RPE 7")).await;
    let rest = create_exercise(&pool, coach, activity, "Off", ExerciseType::Rest, Some("RPE 1")).await;
    week_db::upsert_plan_week(
        &pool,
        activity,
        1,
        &json!({"monday": {"1": [lift]}, "tuesday": {"1": [rest]}}),
    )
    .await
    .unwrap();

    let client = Uuid::new_v4();
    expand(&pool, client, activity, DEADLINE).await.unwrap();

    // Editing the exercise afterwards must not change scheduled records.
    sqlx::query("UPDATE exercises SET base_intensity = 'RPE 10' WHERE id = $1")
        .bind(lift)
        .execute(&pool)
        .await
        .unwrap();

    let records = exec_db::list_for_client_activity(&pool, client, activity)
        .await
        .unwrap();
    assert_eq!(records[0].applied_intensity.as_deref(), Some("RPE 7"));
    assert_eq!(records[1].applied_intensity.as_deref(), Some(REST_INTENSITY));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn activity_without_weeks_is_a_validation_error() {
    let (pool, db_name) = create_test_db().await;
    let activity = create_activity(&pool, Uuid::new_v4()).await;

    let err = expand(&pool, Uuid::new_v4(), activity, DEADLINE)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation { field, .. } => assert_eq!(field, "activity_id"),
        other => panic!("unexpected error: {other}"),
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_activity_is_a_validation_error() {
    let (pool, db_name) = create_test_db().await;

    let err = expand(&pool, Uuid::new_v4(), Uuid::new_v4(), DEADLINE)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }), "{err}");

    let err = expand(&pool, Uuid::nil(), Uuid::new_v4(), DEADLINE)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation { field, .. } => assert_eq!(field, "client_id"),
        other => panic!("unexpected error: {other}"),
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn malformed_week_names_the_offending_field() {
    let (pool, db_name) = create_test_db().await;
    let coach = Uuid::new_v4();
    let activity = create_activity(&pool, coach).await;
    week_db::upsert_plan_week(&pool, activity, 1, &json!({"monday": {"warmup": [1]}}))
        .await
        .unwrap();

    let client = Uuid::new_v4();
    let err = expand(&pool, client, activity, DEADLINE).await.unwrap_err();
    match err {
        EngineError::Validation { field, .. } => {
            assert!(field.starts_with("weeks.1.days.monday"), "field was {field}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing was written.
    let count = exec_db::count_for_client_activity(&pool, client, activity)
        .await
        .unwrap();
    assert_eq!(count, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dangling_exercise_reference_is_an_invariant_violation() {
    let (pool, db_name) = create_test_db().await;
    let coach = Uuid::new_v4();
    let activity = create_activity(&pool, coach).await;
    let a = create_exercise(&pool, coach, activity, "Jog", ExerciseType::Cardio, None).await;
    week_db::upsert_plan_week(&pool, activity, 1, &json!({"monday": {"1": [a, 999_999]}}))
        .await
        .unwrap();

    let client = Uuid::new_v4();
    let err = expand(&pool, client, activity, DEADLINE).await.unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)), "{err}");
    assert!(!err.is_retryable());

    let progress = ledger::progress_summary(&pool, client, activity, DEADLINE)
        .await
        .unwrap();
    assert_eq!(progress.total, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn empty_week_rows_are_an_invariant_violation() {
    let (pool, db_name) = create_test_db().await;
    let activity = create_activity(&pool, Uuid::new_v4()).await;
    week_db::upsert_plan_week(&pool, activity, 1, &json!({"monday": {}}))
        .await
        .unwrap();

    let err = expand(&pool, Uuid::new_v4(), activity, DEADLINE)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)), "{err}");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn failed_insert_leaves_no_records_and_no_marker() {
    let (pool, db_name) = create_test_db().await;
    let (activity, _, _) = two_period_fixture(&pool).await;
    let client = Uuid::new_v4();

    sqlx::query(
        "CREATE FUNCTION reject_third_record() RETURNS trigger AS $$ \
         BEGIN \
           IF NEW.sequence = 3 THEN RAISE EXCEPTION 'third record rejected'; END IF; \
           RETURN NEW; \
         END; $$ LANGUAGE plpgsql",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_third_record BEFORE INSERT ON executions \
         FOR EACH ROW EXECUTE FUNCTION reject_third_record()",
    )
    .execute(&pool)
    .await
    .unwrap();

    let err = expand(&pool, client, activity, DEADLINE).await.unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)), "{err}");
    assert!(err.is_retryable());
    assert_eq!(
        exec_db::count_for_client_activity(&pool, client, activity).await.unwrap(),
        0
    );
    assert!(!exec_db::expansion_recorded(&pool, client, activity).await.unwrap());

    sqlx::query("DROP TRIGGER reject_third_record ON executions")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(expand(&pool, client, activity, DEADLINE).await.unwrap(), 4);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn expansion_past_its_deadline_commits_nothing() {
    let (pool, db_name) = create_test_db().await;
    let (activity, _, _) = two_period_fixture(&pool).await;
    let client = Uuid::new_v4();

    // Another transaction holds the pair's expansion lock.
    let mut holder = pool.begin().await.unwrap();
    exec_db::lock_client_activity(&mut *holder, client, activity)
        .await
        .unwrap();

    let short = Duration::from_millis(300);
    let err = expand(&pool, client, activity, short).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(d) if d == short), "{err}");
    holder.rollback().await.unwrap();

    assert_eq!(
        exec_db::count_for_client_activity(&pool, client, activity).await.unwrap(),
        0
    );
    assert!(!exec_db::expansion_recorded(&pool, client, activity).await.unwrap());
    assert_eq!(expand(&pool, client, activity, DEADLINE).await.unwrap(), 4);

    drop_test_db(&db_name).await;
}
