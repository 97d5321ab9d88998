//! Schema and pool bootstrap tests.

use uuid::Uuid;

use regimen_db::config::DbConfig;
use regimen_db::pool;
use regimen_test_utils::{create_test_db, drop_test_db, pg_url};

#[tokio::test]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let mut present: Vec<String> = sqlx::query_scalar(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' AND tablename NOT LIKE '\\_sqlx%'",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");
    present.sort();
    let mut expected: Vec<String> = pool::SCHEMA_TABLES.iter().map(|t| t.to_string()).collect();
    expected.sort();
    assert_eq!(present, expected);

    let counts = pool::table_counts(&pool).await.expect("table_counts");
    assert_eq!(counts.len(), pool::SCHEMA_TABLES.len());
    for (name, count) in &counts {
        assert_eq!(*count, 0, "table {name} should be empty");
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    pool::run_migrations(&pool)
        .await
        .expect("second migration run should be a no-op");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schema_rejects_out_of_range_values() {
    let (pool, db_name) = create_test_db().await;

    let activity: (Uuid,) = sqlx::query_as(
        "INSERT INTO activities (coach_id, title) VALUES ($1, 'x') RETURNING id",
    )
    .bind(Uuid::new_v4())
    .fetch_one(&pool)
    .await
    .unwrap();

    let zero_periods = sqlx::query("INSERT INTO period_specs (activity_id, period_count) VALUES ($1, 0)")
        .bind(activity.0)
        .execute(&pool)
        .await;
    assert!(zero_periods.is_err(), "period_count must be at least 1");

    let week_zero = sqlx::query("INSERT INTO plan_weeks (activity_id, week_number) VALUES ($1, 0)")
        .bind(activity.0)
        .execute(&pool)
        .await;
    assert!(week_zero.is_err(), "week_number must be at least 1");

    let bad_type = sqlx::query(
        "INSERT INTO exercises (coach_id, name, exercise_type) VALUES ($1, 'x', 'yoga')",
    )
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await;
    assert!(bad_type.is_err(), "exercise_type is a closed set");

    let bad_day = sqlx::query(
        "INSERT INTO executions \
           (client_id, activity_id, exercise_id, exercise_name, period_index, week_number, \
            day_of_week, block, order_in_block, sequence) \
         VALUES ($1, $2, 1, 'x', 1, 1, 8, 1, 1, 1)",
    )
    .bind(Uuid::new_v4())
    .bind(activity.0)
    .execute(&pool)
    .await;
    assert!(bad_day.is_err(), "day_of_week is ISO 1..7");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_is_idempotent() {
    let db_name = format!("regimen_test_{}", Uuid::new_v4().simple());
    let config = DbConfig::new(format!("{}/{db_name}", pg_url().await));
    assert_eq!(config.database_name(), Some(db_name.as_str()));

    let created = pool::ensure_database_exists(&config)
        .await
        .expect("first ensure should succeed");
    assert!(created);
    let created = pool::ensure_database_exists(&config)
        .await
        .expect("second ensure should succeed (idempotent)");
    assert!(!created);

    let pool = pool::create_pool(&config).await.expect("connect");
    let one: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
    assert_eq!(one.0, 1);
    pool.close().await;

    drop_test_db(&db_name).await;
}
