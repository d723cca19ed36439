//! Sleep Monitor Agent CLI
//!
//! Background sensor logger with SQLite buffering and daily CSV rollover.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sleep_monitor_agent::{
    collector::{Collector, CollectorConfig, SensorCache},
    config::{Config, SourceConfig},
    core::{CollectionCycle, CycleConfig, Exporter, RolloverOutcome, RolloverReport, Status},
    scheduler::Scheduler,
    status::{FileStatusStore, StatusSource, STATUS_KEY},
    storage::{FailureLog, SqliteStore, StoreOptions},
    transparency::{create_shared_log_with_persistence, PersistedStats},
    VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sleep-monitor")]
#[command(version = VERSION)]
#[command(about = "Background sensor logger for sleep tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collecting sensor data
    Start {
        /// Sensor channels to sample (light, proximity, accelerometer, gyroscope, or all)
        #[arg(long)]
        sources: Option<String>,

        /// Seconds between collection ticks
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Pause data collection
    Pause,

    /// Resume data collection
    Resume,

    /// Mark the user as sleeping
    Sleep,

    /// Mark the user as awake
    Wake,

    /// Show current collection status
    Status,

    /// Export the buffered rows to CSV now and clear the store
    Export,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { sources, interval } => cmd_start(sources.as_deref(), interval),
        Commands::Pause => cmd_set_paused(true),
        Commands::Resume => cmd_set_paused(false),
        Commands::Sleep => cmd_set_status(Status::Sleeping),
        Commands::Wake => cmd_set_status(Status::Awake),
        Commands::Status => cmd_status(),
        Commands::Export => cmd_export(),
        Commands::Config => cmd_config(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> anyhow::Result<Config> {
    Config::load().with_context(|| format!("Failed to load {:?}", Config::config_path()))
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let options = StoreOptions {
        retry: config.retry.clone(),
        timestamp_mode: config.timestamp_mode,
    };
    let path = config.database_path();
    SqliteStore::open(&path, FailureLog::new(config.failure_log_path()), options)
        .with_context(|| format!("Failed to open database {path:?}"))
}

fn cmd_start(sources: Option<&str>, interval: Option<u64>) -> anyhow::Result<()> {
    init_tracing();

    let mut config = load_config()?;
    if let Some(sources) = sources {
        config.sources = SourceConfig::from_csv(sources);
    }
    if let Some(secs) = interval {
        config.tick_interval = Duration::from_secs(secs);
    }
    config.validate()?;
    if !config.sources.any_enabled() {
        tracing::warn!("No sensor channels enabled; every record will carry default values");
    }
    config
        .ensure_directories()
        .context("Could not create data directories")?;

    println!("Sleep Monitor Agent v{VERSION}");
    println!();
    println!("Starting collection...");
    print_sources(&config.sources);
    println!("  Tick interval: {}s", config.tick_interval.as_secs());
    println!("  Export threshold: {} rows", config.export_threshold);
    println!("  Exports: {:?}", config.export_path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let log = create_shared_log_with_persistence(config.stats_path());
    let store = Arc::new(open_store(&config)?);
    let exporter = Exporter::new(config.export_path.clone(), config.tz()?);

    let mut collector = Collector::new(CollectorConfig {
        capture_light: config.sources.light,
        capture_proximity: config.sources.proximity,
        capture_accelerometer: config.sources.accelerometer,
        capture_gyroscope: config.sources.gyroscope,
        ..Default::default()
    });
    let sensors = SensorCache::new(collector.receiver().clone());

    let mut cycle = CollectionCycle::new(
        sensors,
        Box::new(FileStatusStore::new(config.status_path())),
        Arc::clone(&store),
        exporter,
        Arc::clone(&log),
        CycleConfig {
            export_threshold: config.export_threshold,
            ..Default::default()
        },
    )
    .context("Failed to start record writer")?;

    let (scheduler, stop) = Scheduler::new(config.tick_interval);
    ctrlc::set_handler(move || stop.stop()).context("Error setting Ctrl+C handler")?;

    // `pause`/`resume` from another process are picked up through the config file.
    let mut paused = config.paused;
    if paused {
        println!("Collection is currently paused.");
        println!("Run `sleep-monitor resume` to start collecting.");
        println!();
    } else {
        collector.start().context("Error starting sensor source")?;
    }

    let run = scheduler.run(
        || {
            let now_paused = match Config::load() {
                Ok(cfg) => cfg.paused,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not reload config, keeping pause state");
                    paused
                }
            };
            if now_paused != paused {
                paused = now_paused;
                if paused {
                    println!("Pausing collection...");
                    collector.stop();
                } else {
                    println!("Resuming collection...");
                    if let Err(e) = collector.start() {
                        tracing::error!(error = %e, "Could not restart sensor source");
                    }
                }
            }
            paused
        },
        || {
            let report = cycle.tick();
            let rows = report
                .row_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "[{}] {} | rows: {}",
                chrono::Local::now().format("%H:%M:%S"),
                report.record.describe(),
                rows
            );
            if let Some(rollover) = &report.rollover {
                print_rollover(rollover);
            }
        },
    );

    println!();
    println!("Stopping collection...");
    collector.stop();
    cycle.shutdown();
    tracing::debug!(fired = run.fired, skipped = run.skipped_paused, "Scheduler finished");

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_set_paused(paused: bool) -> anyhow::Result<()> {
    let mut config = load_config()?;
    config.paused = paused;
    config.save().context("Error saving config")?;
    if paused {
        println!("Collection paused. Use 'sleep-monitor resume' to continue.");
    } else {
        println!("Collection resumed.");
    }
    Ok(())
}

fn cmd_set_status(status: Status) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = FileStatusStore::new(config.status_path());
    store
        .set_status(status)
        .with_context(|| format!("Failed to write {:?}", store.path()))?;
    println!("Status set to {status}.");
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config()?;

    println!("Sleep Monitor Agent Status");
    println!("==========================");
    println!();

    println!("Configuration:");
    print_sources(&config.sources);
    println!("  Tick interval: {}s", config.tick_interval.as_secs());
    println!("  Export threshold: {} rows", config.export_threshold);
    println!("  Paused: {}", config.paused);
    println!();

    let status_store = FileStatusStore::new(config.status_path());
    let flag = status_store.get(STATUS_KEY).ok().flatten();
    println!(
        "User status: {}{}",
        status_store.current(),
        if flag.is_none() { " (default)" } else { "" }
    );

    let db_path = config.database_path();
    if db_path.exists() {
        let store = open_store(&config)?;
        println!(
            "Buffered rows: {} / {}",
            store.count().context("Failed to count rows")?,
            config.export_threshold
        );
    } else {
        println!("Buffered rows: 0 (no database yet)");
    }

    let failures = FailureLog::new(config.failure_log_path());
    match failures.entries() {
        Ok(entries) if !entries.is_empty() => {
            println!("Insertion failures: {} (see {:?})", entries.len(), failures.path());
        }
        Ok(_) => println!("Insertion failures: 0"),
        Err(e) => eprintln!("Warning: Could not read failure log: {e}"),
    }
    println!();

    let stats_path = config.stats_path();
    match std::fs::read_to_string(&stats_path) {
        Ok(content) => match serde_json::from_str::<PersistedStats>(&content) {
            Ok(stats) => {
                println!("Cumulative Statistics:");
                println!("  Ticks: {}", stats.ticks);
                println!(
                    "  Records stored: {} ({} via fallback)",
                    stats.records_inserted, stats.fallback_inserts
                );
                println!("  Records lost: {}", stats.records_lost);
                println!(
                    "  Exports: {} completed, {} failed",
                    stats.exports_completed, stats.exports_failed
                );
                println!("  Rows exported: {}", stats.rows_exported);
                println!("  Last updated: {}", stats.last_updated);
            }
            Err(e) => eprintln!("Warning: Unreadable stats file {stats_path:?}: {e}"),
        },
        Err(_) => println!("No previous session data found."),
    }
    Ok(())
}

fn cmd_export() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config()?;
    config
        .ensure_directories()
        .context("Could not create data directories")?;
    let store = open_store(&config)?;
    let exporter = Exporter::new(config.export_path.clone(), config.tz()?);

    match exporter.rollover(&store).context("Export failed")? {
        RolloverOutcome::Completed(report) => {
            println!("Exported {} rows to {:?}", report.rows, report.path);
        }
        RolloverOutcome::ResetFailed { report, error } => {
            // Without a running cycle to finish the reset, drop the exported rows here.
            eprintln!("Warning: Store reset failed after export: {error}");
            if let (Some(last_id), Some(timestamp)) = (report.last_id, &report.last_timestamp) {
                match store
                    .delete_exported(last_id, timestamp)
                    .context("Exported rows could not be removed")?
                {
                    Some(deleted) => println!("Removed {deleted} exported rows."),
                    None => println!("Exported rows were already removed."),
                }
            }
            println!("Exported {} rows to {:?}", report.rows, report.path);
        }
        RolloverOutcome::Empty => println!("No buffered rows to export."),
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Database: {:?}", config.database_path());
    println!("Failure log: {:?}", config.failure_log_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}

fn print_sources(sources: &SourceConfig) {
    let state = |on: bool| if on { "enabled" } else { "unavailable" };
    println!("  Light: {}", state(sources.light));
    println!("  Proximity: {}", state(sources.proximity));
    println!("  Accelerometer: {}", state(sources.accelerometer));
    println!("  Gyroscope: {}", state(sources.gyroscope));
}

fn print_rollover(report: &RolloverReport) {
    match report {
        RolloverReport::Completed(export) => {
            println!("  Exported {} rows to {:?}", export.rows, export.path);
        }
        RolloverReport::ResetDeferred(export) => {
            println!(
                "  Exported {} rows to {:?}; reset deferred",
                export.rows, export.path
            );
        }
        RolloverReport::Failed(error) => eprintln!("  Export failed: {error}"),
        RolloverReport::PendingResetCleared { deleted } => {
            println!("  Cleared {deleted} previously exported rows");
        }
    }
}
