//! Ingest Service - Turns uploaded district reports into dashboard statistics
//!
//! Responsibilities:
//! - Parse CSV/XLSX reports dropped into `incoming_reports/`
//! - Merge per-district metrics into the store in bounded batches
//! - Recompute the statewide summary and insight report
//! - Roll up monthly historical data points
//! - File every report under processed/error locations
//!
//! Usage:
//!   # One uploaded file:
//!   cargo run --bin ingest -- upload --path incoming_reports/1718000000000-june.csv --month 2025-06
//!
//!   # Scheduled jobs:
//!   cargo run --bin ingest -- insights
//!   cargo run --bin ingest -- monthly
//!
//!   # Long-running poller with both schedules:
//!   cargo run --bin ingest -- watch
//!
//!   # Preview a local file without touching the database:
//!   cargo run --bin ingest -- dry-run --file ./june.csv

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ingest::model::MonthKey;
use ingest::orchestrator::{Pipeline, PipelineSettings, UploadEvent, UploadHandler, UploadOutcome};
use ingest::triggers::{watch, Watcher};
use ingest::{init_tracing, BucketLayout, Config, FsBucket, MemoryStore, MetricsStore, PgStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Ingests district reports and aggregates statistics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Handle one uploaded report (bucket path under REPORTS_DIR)
    Upload {
        #[arg(long)]
        path: String,

        /// Reporting month (YYYY-MM); also writes the historical point
        #[arg(long)]
        month: Option<MonthKey>,
    },

    /// Regenerate the statewide summary and insight report
    Insights,

    /// Aggregate the historical point for a month (default: previous month)
    Monthly {
        #[arg(long)]
        month: Option<MonthKey>,
    },

    /// Poll incoming reports and run the daily/monthly schedules
    Watch,

    /// Apply database migrations
    Migrate,

    /// Parse and aggregate a local file in memory; nothing is written
    DryRun {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        month: Option<MonthKey>,
    },
}

async fn connect(config: &Config) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(config.db_url()?, 5)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(store))
}

fn settings(config: &Config) -> PipelineSettings {
    PipelineSettings {
        batch_limit: config.batch_limit,
        ..PipelineSettings::default()
    }
}

async fn dry_run(config: &Config, file: &Path, month: Option<MonthKey>) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File path has no file name")?;
    let bytes = fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let pipeline = Pipeline::new(Arc::new(MemoryStore::new()), settings(config));
    let report = pipeline.ingest(filename, &bytes, month, Utc::now()).await?;

    println!("=== Dry run: {} ===", filename);
    println!("{}", serde_json::to_string_pretty(&report)?);

    let store = pipeline.store();
    println!("\nDistricts:");
    println!("{}", serde_json::to_string_pretty(&store.list_districts().await?)?);
    if let Some(summary) = store.summary().await? {
        println!("\nSummary:");
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    if let Some(insights) = store.insights().await? {
        println!("\nInsights:");
        println!("{}", serde_json::to_string_pretty(&insights)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Command::Upload { path, month } => {
            let store = connect(&config).await?;
            let handler = UploadHandler::new(
                Pipeline::new(store, settings(&config)),
                FsBucket::new(&config.reports_dir),
                BucketLayout::default(),
            );

            let mut event = UploadEvent::new(path);
            if let Some(month) = month {
                event = event.with_month(month);
            }

            match handler.handle(&event, Utc::now()).await? {
                UploadOutcome::Failed { moved_to, error } => {
                    anyhow::bail!("report filed under {}: {}", moved_to, error)
                }
                outcome => info!(?outcome, "upload handled"),
            }
        }

        Command::Insights => {
            let store = connect(&config).await?;
            let pipeline = Pipeline::new(store, settings(&config));
            pipeline
                .regenerate_insights(Utc::now())
                .await
                .context("Insight regeneration failed")?;
        }

        Command::Monthly { month } => {
            let now = Utc::now();
            let month = month.unwrap_or_else(|| MonthKey::previous(now));
            let store = connect(&config).await?;
            let pipeline = Pipeline::new(store, settings(&config));
            pipeline
                .aggregate_month(month)
                .await
                .with_context(|| format!("Historical aggregation for {} failed", month))?;
        }

        Command::Watch => {
            let store = connect(&config).await?;
            let handler = UploadHandler::new(
                Pipeline::new(store, settings(&config)),
                FsBucket::new(&config.reports_dir),
                BucketLayout::default(),
            );
            info!(reports_dir = %config.reports_dir.display(), "starting watcher");
            watch(Watcher::new(handler, Utc::now()), config.watch_interval).await;
        }

        Command::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await.context("Migration failed")?;
            info!("migrations applied");
        }

        Command::DryRun { file, month } => {
            if config.db_url.is_some() {
                warn!("dry run ignores DB_URL; nothing will be persisted");
            }
            dry_run(&config, &file, month).await?;
        }
    }

    Ok(())
}
