mod alert;
mod app;
mod cursor;
mod gate;
mod model;
mod normalize;
mod pipeline;
mod search;
mod sink;
mod store;
#[cfg(test)]
mod testing;

use app::{Alerting, App};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use harvester_core::{telemetry, Config, RunMode};
use pipeline::{AlertingHooks, LifecycleHooks};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use store::PgStore;
use tracing::{error, info};

const ALERT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[clap(name = "harvester")]
#[clap(about = "Geo-filtered social search harvester", version)]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[clap(long, global = true, env = "HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Run ingestion in the configured mode
    Run,

    /// Walk a closed date range backwards, then stop
    Backfill {
        /// First day of the range (YYYY-MM-DD)
        #[clap(long)]
        since: NaiveDate,

        /// Day the walk starts from (YYYY-MM-DD)
        #[clap(long)]
        until: NaiveDate,

        /// Resume below this item id
        #[clap(long)]
        resume_from: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let mut alerting = Alerting::disabled();
    let result = run(&mut alerting).await;

    if let Err(e) = &result {
        if !telemetry::is_initialized() {
            eprintln!("Error: {e:#}");
        }
        AlertingHooks::new(alerting.alerter.clone()).on_fatal(e);
    }

    alerting.flush(ALERT_FLUSH_TIMEOUT).await;
    telemetry::shutdown();

    if result.is_err() {
        process::exit(1);
    }
}

/// Everything holding an `Alerter` is dropped by the time this returns, so
/// the caller can drain the alert queue.
async fn run(alerting: &mut Alerting) -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if let Commands::Backfill {
        since,
        until,
        resume_from,
    } = &cli.command
    {
        config.query.mode = RunMode::Bounded;
        config.query.since = Some(*since);
        config.query.until = Some(*until);
        if resume_from.is_some() {
            config.query.resume_cursor = resume_from.clone();
        }
    }

    telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Migrate => {
            config
                .validate_database()
                .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

            info!("Running database migrations");
            let store = PgStore::connect(&config.database).await?;
            store.migrate().await?;
            info!("Migrations completed successfully");
        }

        Commands::Run | Commands::Backfill { .. } => {
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

            *alerting = app::start_alerting(&config)?;
            let app = App::new(config, alerting).await?;

            tokio::select! {
                summary = app.run() => {
                    info!(?summary, "Ingestion finished");
                }
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                }
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
