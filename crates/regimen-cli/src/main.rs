mod config;
mod plan_cmds;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

use regimen_core::OrphanPolicy;
use regimen_core::{enrollment, ledger, mutator};
use regimen_db::pool;
use regimen_db::queries::enrollments as enrollment_queries;

use config::{EngineSettings, RegimenConfig};

#[derive(Parser)]
#[command(name = "regimen", about = "Training plan expansion and execution ledger")]
struct Cli {
    /// Database URL (overrides REGIMEN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a regimen config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/regimen")]
        db_url: String,
        /// Deadline for a single engine operation, in seconds
        #[arg(long, default_value_t = config::DEFAULT_OPERATION_TIMEOUT_SECS)]
        timeout: u64,
        /// What retraction does with incomplete executions: retain or purge_pending
        #[arg(long, default_value = "purge_pending")]
        orphan_policy: OrphanPolicy,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the regimen database and apply migrations
    DbInit,
    /// Serve the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Plan authoring
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Enroll a client in an activity and expand the plan
    Enroll {
        /// Client ID
        #[arg(long)]
        client: String,
        /// Activity ID
        #[arg(long)]
        activity: String,
    },
    /// Show progress for one client, or for every client enrolled in an activity
    Progress {
        /// Activity ID
        activity: String,
        /// Client ID (omit to list all enrollments)
        #[arg(long)]
        client: Option<String>,
    },
    /// Remove exercises from an activity's plan
    Retract {
        /// Activity ID
        activity: String,
        /// Coach performing the retraction
        #[arg(long)]
        coach: String,
        /// Exercise IDs to remove
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Override the configured orphan policy
        #[arg(long)]
        policy: Option<OrphanPolicy>,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Import a plan from a TOML file
    Import {
        /// Path to the plan TOML file
        file: String,
    },
    /// Print an activity's plan as TOML
    Show {
        /// Activity ID
        activity_id: String,
        /// Output file path (defaults to stdout)
        #[arg(long)]
        output: Option<String>,
    },
    /// List a coach's activities
    List {
        /// Coach ID
        #[arg(long)]
        coach: String,
    },
}

fn parse_uuid(raw: &str, what: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid {what}: {raw}"))
}

/// Execute the `regimen init` command: write config file.
fn cmd_init(db_url: &str, timeout: u64, orphan_policy: OrphanPolicy, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if timeout == 0 {
        anyhow::bail!("--timeout must be at least one second");
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        engine: config::EngineSection {
            operation_timeout_secs: timeout,
            orphan_policy,
        },
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url                  = {db_url}");
    println!("  engine.operation_timeout_secs = {timeout}");
    println!("  engine.orphan_policy          = {orphan_policy}");
    println!();
    println!("Next: run `regimen db-init` to create and migrate the database.");
    Ok(())
}

/// Execute the `regimen db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = RegimenConfig::resolve(cli_db_url)?;

    println!("Initializing regimen database...");

    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database {}.", resolved.db_config.database_name().unwrap_or("?"));
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("regimen db-init complete.");
    Ok(())
}

async fn cmd_enroll(
    pool: &PgPool,
    settings: &EngineSettings,
    client: &str,
    activity: &str,
) -> anyhow::Result<()> {
    let client_id = parse_uuid(client, "client ID")?;
    let activity_id = parse_uuid(activity, "activity ID")?;

    let outcome =
        enrollment::enroll(pool, client_id, activity_id, settings.operation_timeout).await?;

    println!("Enrollment {}", outcome.enrollment.id);
    if outcome.created == 0 {
        println!("  Plan already expanded; no executions created.");
    } else {
        println!("  Executions created: {}", outcome.created);
    }
    Ok(())
}

async fn cmd_progress(
    pool: &PgPool,
    settings: &EngineSettings,
    activity: &str,
    client: Option<&str>,
) -> anyhow::Result<()> {
    let activity_id = parse_uuid(activity, "activity ID")?;
    let deadline = settings.operation_timeout;

    let clients = match client {
        Some(raw) => vec![(parse_uuid(raw, "client ID")?, None)],
        None => enrollment_queries::list_enrollments_for_activity(pool, activity_id)
            .await?
            .into_iter()
            .map(|e| (e.client_id, Some(e.status)))
            .collect(),
    };

    if clients.is_empty() {
        println!("No enrollments for activity {activity_id}.");
        return Ok(());
    }

    println!("{:<38} {:<10} {:>9}  NEXT", "CLIENT", "STATUS", "PROGRESS");
    for (client_id, status) in clients {
        let summary = ledger::progress_summary(pool, client_id, activity_id, deadline).await?;
        let next = ledger::next_pending(pool, client_id, activity_id, deadline).await?;
        let next = match next {
            Some(r) => format!(
                "#{} {} (period {}, week {}, day {}, block {})",
                r.sequence, r.exercise_name, r.period_index, r.week_number, r.day_of_week, r.block
            ),
            None => "-".to_string(),
        };
        let status = status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:>9}  {}",
            client_id,
            status,
            format!("{}/{}", summary.completed, summary.total),
            next
        );
    }
    Ok(())
}

async fn cmd_retract(
    pool: &PgPool,
    settings: &EngineSettings,
    activity: &str,
    coach: &str,
    ids: &[i64],
    policy: Option<OrphanPolicy>,
) -> anyhow::Result<()> {
    let activity_id = parse_uuid(activity, "activity ID")?;
    let coach_id = parse_uuid(coach, "coach ID")?;
    let policy = policy.unwrap_or(settings.orphan_policy);

    let outcome = mutator::remove_exercises(
        pool,
        coach_id,
        activity_id,
        ids,
        policy,
        settings.operation_timeout,
    )
    .await?;

    println!("Retracted {} exercise(s) ({policy}).", outcome.retracted.len());
    println!("  Plan entries removed:    {}", outcome.removed_from_plan);
    println!("  Exercises deleted:       {}", outcome.exercises_fully_deleted);
    println!("  Executions purged:       {}", outcome.executions_purged);
    println!("  Enrollments completed:   {}", outcome.enrollments_completed.len());
    println!("  Weeks rewritten:         {:?}", outcome.touched_weeks);
    println!("  Weeks deleted:           {:?}", outcome.deleted_weeks);
    if !outcome.rejected.is_empty() {
        println!();
        println!("Rejected:");
        for r in &outcome.rejected {
            println!("  {} ({})", r.exercise_id, r.reason);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            timeout,
            orphan_policy,
            force,
        } => {
            cmd_init(&db_url, timeout, orphan_policy, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = RegimenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                serve_cmd::run_serve(db_pool.clone(), resolved.engine, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            let resolved = RegimenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::run_plan_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Enroll { client, activity } => {
            let resolved = RegimenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cmd_enroll(&db_pool, &resolved.engine, &client, &activity).await;
            db_pool.close().await;
            result?;
        }
        Commands::Progress { activity, client } => {
            let resolved = RegimenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                cmd_progress(&db_pool, &resolved.engine, &activity, client.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Retract {
            activity,
            coach,
            ids,
            policy,
        } => {
            let resolved = RegimenConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cmd_retract(
                &db_pool,
                &resolved.engine,
                &activity,
                &coach,
                &ids,
                policy,
            )
            .await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands, PlanCommands};
    use regimen_core::OrphanPolicy;

    #[test]
    fn retract_parses_ids_and_policy() {
        let cli = Cli::try_parse_from([
            "regimen",
            "retract",
            "00000000-0000-0000-0000-000000000001",
            "--coach",
            "00000000-0000-0000-0000-000000000002",
            "--policy",
            "retain",
            "3",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Retract { ids, policy, .. } => {
                assert_eq!(ids, vec![3, 5]);
                assert_eq!(policy, Some(OrphanPolicy::Retain));
            }
            _ => panic!("expected retract"),
        }
    }

    #[test]
    fn retract_requires_ids() {
        let result = Cli::try_parse_from([
            "regimen",
            "retract",
            "00000000-0000-0000-0000-000000000001",
            "--coach",
            "00000000-0000-0000-0000-000000000002",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn init_defaults() {
        let cli = Cli::try_parse_from(["regimen", "init"]).unwrap();
        match cli.command {
            Commands::Init {
                db_url,
                timeout,
                orphan_policy,
                force,
            } => {
                assert_eq!(db_url, "postgresql://localhost:5432/regimen");
                assert_eq!(timeout, 30);
                assert_eq!(orphan_policy, OrphanPolicy::PurgePending);
                assert!(!force);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn plan_show_takes_output_flag() {
        let cli = Cli::try_parse_from([
            "regimen",
            "--database-url",
            "postgresql://h/db",
            "plan",
            "show",
            "00000000-0000-0000-0000-000000000001",
            "--output",
            "plan.toml",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("postgresql://h/db"));
        match cli.command {
            Commands::Plan {
                command: PlanCommands::Show { output, .. },
            } => assert_eq!(output.as_deref(), Some("plan.toml")),
            _ => panic!("expected plan show"),
        }
    }
}
