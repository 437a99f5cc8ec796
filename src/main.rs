//! # fieldwatch command line
//!
//! Operational entry point: schema migration, connection health and open
//! alarm reports, and the reading retention sweeper.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use fieldwatch::{
    config::{AppConfig, ConfigLoader},
    db,
    domain::AlarmSeverity,
    repositories::{
        AlarmFilter, AlarmRepository, AlarmStore, ConnectionRepository, ConnectionStore,
        ReadingRepository,
    },
    retention::RetentionSweeper,
    telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "fieldwatch")]
#[command(about = "Condition monitoring for remote field devices")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Show connection health for a tenant
    Status {
        #[arg(long)]
        tenant: Uuid,
    },
    /// List open alarms for a tenant, most urgent first
    Alarms {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        well: Option<Uuid>,
        /// CRITICAL, WARNING or INFORMATIONAL
        #[arg(long)]
        severity: Option<AlarmSeverity>,
        #[arg(long, default_value = "50")]
        limit: u64,
    },
    /// Delete readings older than the retention window
    Sweep {
        /// Sweep once and exit instead of running on the configured interval
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );

    match args.command {
        Command::Migrate => {
            Migrator::up(&*db, None).await.context("applying migrations")?;
            info!("Migrations applied");
        }
        Command::Status { tenant } => status(&config, db, tenant).await?,
        Command::Alarms {
            tenant,
            well,
            severity,
            limit,
        } => {
            let alarms = AlarmRepository::new(db);
            let filter = AlarmFilter {
                well_id: well,
                severity,
                limit: Some(limit),
                ..AlarmFilter::for_tenant(tenant)
            };
            let now = Utc::now();
            for alarm in alarms.find_active(&filter).await? {
                println!(
                    "{:<13} {:<12} {:<11} {:<24} count={:<5} age={}s  {}",
                    alarm.severity().as_str(),
                    alarm.state().as_str(),
                    alarm.alarm_type().as_str(),
                    alarm.tag_name(),
                    alarm.trigger_count(),
                    alarm.age(now).num_seconds(),
                    alarm.message()
                );
            }
            for (severity, count) in alarms.count_active_by_severity(tenant).await? {
                println!("{severity}: {count} open");
            }
        }
        Command::Sweep { once } => {
            let sweeper = RetentionSweeper::new(
                Arc::new(ReadingRepository::new(db)),
                config.retention.clone(),
            );
            if once {
                let deleted = sweeper.sweep_once(Utc::now()).await?;
                println!("Deleted {deleted} readings");
            } else {
                let shutdown = CancellationToken::new();
                let signal = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        signal.cancel();
                    }
                });
                sweeper.run(shutdown).await;
            }
        }
    }

    Ok(())
}

async fn status(
    config: &AppConfig,
    db: Arc<sea_orm::DatabaseConnection>,
    tenant: Uuid,
) -> Result<()> {
    let crypto_key = config.crypto_key().context("loading crypto key")?;
    let connections = ConnectionRepository::new(db, crypto_key);
    let threshold = chrono::Duration::from_std(config.monitor.staleness_threshold())
        .context("staleness threshold out of range")?;
    let now = Utc::now();

    for connection in connections.find_all(tenant).await? {
        let health = if connection.is_healthy(threshold, now) {
            "healthy"
        } else {
            "unhealthy"
        };
        println!(
            "{} {:<24} {:<10} {:<9} last_connected={} {}",
            connection.id(),
            connection.name(),
            connection.status().as_str(),
            health,
            connection
                .last_connected_at()
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            connection.last_error_message().unwrap_or_default()
        );
    }
    Ok(())
}
