//! trafficcam-ingest - traffic camera snapshot poller
//!
//! ## Usage
//!
//! ```bash
//! # Poll forever (default)
//! trafficcam-ingest --database-url postgres://localhost/traffic
//!
//! # One cycle, nothing written to the database
//! trafficcam-ingest run --once --dry-run
//!
//! # Replay a past window, one snapshot every 30 s
//! trafficcam-ingest backfill --start 2023-11-07T08:00:00 --end 2023-11-07T09:00:00
//! ```
//!
//! ## Environment variables
//!
//! | Variable             | Required | Description                                  |
//! |----------------------|----------|----------------------------------------------|
//! | `DB_CONN_STR`        | Yes*     | PostgreSQL connection string                 |
//! | `DATABASE_URL`       | Yes*     | Fallback for `DB_CONN_STR`                   |
//! | `TRAFFICCAM_CONFIG`  | No       | Path to a TOML config file                   |
//! | `SNAPSHOT_URL`       | No       | Snapshot endpoint override                   |
//! | `POLL_INTERVAL_SECS` | No       | Sleep between cycles (default: 120)          |
//! | `PAYLOAD_WORKERS`    | No       | Concurrent image downloads (default: 50)     |
//! | `RUST_LOG`           | No       | Log filter                                   |
//!
//! *Not needed with `--dry-run`.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use trafficcam_ingest::config::{defaults, IngestConfig};
use trafficcam_ingest::store::db;
use trafficcam_ingest::{MemoryStore, PgImageStore, Scheduler, SnapshotStore, TrafficClient};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "trafficcam-ingest")]
#[command(about = "Traffic camera snapshot poller")]
#[command(version)]
struct CliArgs {
    /// TOML config file (default: ./trafficcam.toml if present)
    #[arg(long, env = "TRAFFICCAM_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection URL (overrides DB_CONN_STR / DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Snapshot endpoint
    #[arg(long)]
    snapshot_url: Option<String>,

    /// Seconds to sleep after each cycle
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Maximum concurrent image downloads
    #[arg(long)]
    workers: Option<usize>,

    /// Do not apply database migrations at startup
    #[arg(long)]
    skip_migrations: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Poll the live snapshot (the default)
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Keep rows in memory instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },

    /// Ingest historical snapshots over a time window
    Backfill {
        /// First timestamp, e.g. 2023-11-07T08:00:00
        #[arg(long)]
        start: NaiveDateTime,
        /// Last timestamp (inclusive)
        #[arg(long)]
        end: NaiveDateTime,
        /// Seconds between timestamps
        #[arg(long, default_value_t = defaults::BACKFILL_STEP_SECS)]
        step_secs: i64,
        /// Keep rows in memory instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },
}

impl SubCommand {
    fn dry_run(&self) -> bool {
        match self {
            Self::Run { dry_run, .. } | Self::Backfill { dry_run, .. } => *dry_run,
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let command = args.command.unwrap_or(SubCommand::Run {
        once: false,
        dry_run: false,
    });

    let mut config = IngestConfig::load(args.config.as_deref())?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(url) = args.snapshot_url {
        config.upstream.snapshot_url = url;
    }
    if let Some(secs) = args.interval_secs {
        config.poll.interval_secs = secs;
    }
    if let Some(workers) = args.workers {
        config.poll.payload_workers = workers;
    }
    if args.skip_migrations {
        config.database.run_migrations = false;
    }

    if command.dry_run() {
        config.validate_without_database()?;
    } else {
        config.validate()?;
    }

    let client = TrafficClient::new(&config.upstream).context("Failed to build HTTP client")?;
    info!(
        snapshot_url = %client.snapshot_url(),
        interval_secs = config.poll.interval_secs,
        workers = config.poll.payload_workers,
        "Starting trafficcam-ingest"
    );
    let source = Arc::new(client);

    if command.dry_run() {
        warn!("Dry run: only fingerprints are kept, in memory, until exit");
        let scheduler = Scheduler::new(
            source,
            MemoryStore::without_payloads(),
            config.poll.interval(),
            config.poll.payload_workers,
        );
        return dispatch(scheduler, command).await;
    }

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if config.database.run_migrations {
        db::run_migrations(&pool)
            .await
            .context("Failed to apply migrations")?;
    } else {
        info!("Skipping migrations");
    }

    let scheduler = Scheduler::new(
        source,
        PgImageStore::new(pool),
        config.poll.interval(),
        config.poll.payload_workers,
    );
    dispatch(scheduler, command).await
}

async fn dispatch<D: SnapshotStore>(
    mut scheduler: Scheduler<TrafficClient, D>,
    command: SubCommand,
) -> Result<()> {
    match command {
        SubCommand::Run { once: true, .. } => {
            // The outcome is already logged; a failed cycle is not a failed process.
            let _ = scheduler.tick(None).await;
        }
        SubCommand::Run { once: false, .. } => {
            tokio::select! {
                _ = scheduler.run() => {}
                _ = shutdown_signal() => {}
            }
        }
        SubCommand::Backfill {
            start,
            end,
            step_secs,
            ..
        } => {
            let step = TimeDelta::seconds(step_secs);
            if step <= TimeDelta::zero() {
                anyhow::bail!("--step-secs must be positive, got {step_secs}");
            }
            if end < start {
                anyhow::bail!("--end ({end}) is before --start ({start})");
            }
            tokio::select! {
                summary = scheduler.run_backfill(start, end, step) => {
                    if summary.failed > 0 {
                        warn!(failed = summary.failed, "Some timestamps were not ingested");
                    }
                }
                _ = shutdown_signal() => {}
            }
        }
    }

    info!("trafficcam-ingest stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,trafficcam_ingest=debug"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
