//! Handlers for `regimen plan` subcommands.
//!
//! - `regimen plan import <file>`          -- import a plan from a TOML file
//! - `regimen plan show <activity-id>`     -- print the stored plan as TOML
//! - `regimen plan list --coach <coach-id>` -- list a coach's activities

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use regimen_core::plan::{import_plan, materialize_plan, parse_plan_toml};
use regimen_db::queries::activities as activity_queries;

use crate::PlanCommands;

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(command: PlanCommands, pool: &PgPool) -> Result<()> {
    match command {
        PlanCommands::Import { file } => cmd_import(pool, &file).await,
        PlanCommands::Show {
            activity_id,
            output,
        } => cmd_show(pool, &activity_id, output.as_deref()).await,
        PlanCommands::List { coach } => cmd_list(pool, &coach).await,
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid {what}: {raw}"))
}

/// Read a plan file, validate it, and write it in one transaction.
async fn cmd_import(pool: &PgPool, file_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read plan file: {file_path}"))?;
    let plan_toml = parse_plan_toml(&content)
        .with_context(|| format!("failed to parse plan file: {file_path}"))?;

    let imported = import_plan(pool, &plan_toml).await?;

    println!("Plan imported.");
    println!();
    println!("  Activity ID: {}", imported.activity.id);
    println!("  Title:       {}", imported.activity.title);
    println!("  Periods:     {}", imported.period_count);
    println!("  Weeks:       {}", imported.weeks);
    println!("  Entries:     {}", imported.entries);
    println!();
    println!("Exercises:");
    for (key, id) in &imported.exercise_ids {
        println!("  {key:<20} {id}");
    }
    Ok(())
}

async fn cmd_show(pool: &PgPool, activity_id: &str, output: Option<&str>) -> Result<()> {
    let id = parse_uuid(activity_id, "activity ID")?;
    let rendered = materialize_plan(pool, id).await?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write plan to {path}"))?;
            println!("Plan written to {path}");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn cmd_list(pool: &PgPool, coach: &str) -> Result<()> {
    let coach_id = parse_uuid(coach, "coach ID")?;
    let activities = activity_queries::list_activities_for_coach(pool, coach_id).await?;

    if activities.is_empty() {
        println!("No activities found.");
        return Ok(());
    }

    println!("{:<38} {:>7}  TITLE", "ID", "PERIODS");
    for activity in &activities {
        let periods = activity_queries::get_period_count(pool, activity.id)
            .await?
            .unwrap_or(regimen_core::plan::DEFAULT_PERIOD_COUNT);
        println!("{:<38} {:>7}  {}", activity.id, periods, activity.title);
    }
    Ok(())
}
