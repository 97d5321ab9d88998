use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/regimen-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables created by the migrations, parents before children.
pub const SCHEMA_TABLES: &[&str] = &[
    "activities",
    "period_specs",
    "plan_weeks",
    "exercises",
    "exercise_activities",
    "enrollments",
    "executions",
    "expansions",
];

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    info!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

/// Apply any pending embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    info!("migrations applied");
    Ok(())
}

/// `CREATE DATABASE` cannot take a bind parameter, so the name is restricted
/// to `[A-Za-z0-9_]`.
fn checked_database_name(config: &DbConfig) -> Result<&str> {
    let name = config
        .database_name()
        .context("could not determine database name from URL")?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("database name {name:?} contains invalid characters");
    }
    Ok(name)
}

/// Create the target database through the maintenance database if it is
/// missing. Returns whether it was created.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let db_name = checked_database_name(config)?;
    let maintenance_url = config.maintenance_url();

    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if !exists {
        maint_pool
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
    }
    maint_pool.close().await;

    info!(db = db_name, created = !exists, "database present");
    Ok(!exists)
}

/// Row count of every table in [`SCHEMA_TABLES`], in that order.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(SCHEMA_TABLES.len());
    for table in SCHEMA_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push(((*table).to_owned(), count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names_are_restricted() {
        let ok = DbConfig::new("postgresql://h:5432/regimen_test_01");
        assert_eq!(checked_database_name(&ok).unwrap(), "regimen_test_01");

        let bad = DbConfig::new("postgresql://h:5432/regimen;drop");
        assert!(checked_database_name(&bad).is_err());

        let missing = DbConfig::new("postgresql://h:5432/");
        assert!(checked_database_name(&missing).is_err());
    }
}
