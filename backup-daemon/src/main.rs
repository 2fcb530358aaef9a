//! Backup Daemon - Main entry point
//!
//! Dumps the configured database on a cron schedule and on demand from
//! standard input, reporting each run to a webhook.

use anyhow::{Context, Result};
use backup_daemon::config::AppConfig;
use backup_daemon::console::{run_console, spawn_stdin_reader};
use backup_daemon::daemon::shutdown::{finish_jobs, ShutdownCoordinator, SHUTDOWN_GRACE};
use backup_daemon::executor::{BackupOrchestrator, NOTIFICATION_TITLE};
use backup_daemon::notify::{Notifier, INFO_COLOR};
use backup_daemon::services::backup_scheduler::BackupScheduler;
use backup_daemon::utils;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Directory for backup files (overrides config)
    #[arg(short, long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Do not read manual commands from standard input
    #[arg(long)]
    no_console: bool,

    /// Run a single backup and exit; the exit status reflects the outcome
    #[arg(long)]
    once: bool,

    /// Database for --once (defaults to the configured primary database)
    #[arg(long, requires = "once")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Missing or invalid settings abort before anything is scheduled
    let mut config = AppConfig::load(args.config.as_deref()).context("Configuration error")?;
    if let Some(dir) = args.backup_dir {
        config.backup_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    utils::logger::init(&config.log_level)?;

    config.ensure_backup_dir().with_context(|| {
        format!(
            "Failed to create backup directory {}",
            config.backup_dir.display()
        )
    })?;

    let config = Arc::new(config);
    let notifier = Notifier::new(config.webhook_url.clone());
    let orchestrator = BackupOrchestrator::new(config.clone(), notifier.clone());

    if args.once {
        let database = orchestrator.resolve_database(args.database.as_deref());
        let outcome = orchestrator.backup(&database).await;
        if !outcome.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    tracing::info!(
        "Starting backup-daemon v{} (database: {}, dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.database.name,
        config.backup_dir.display()
    );

    let scheduler = BackupScheduler::new(orchestrator.clone())
        .await
        .context("Failed to create scheduler")?;
    scheduler
        .schedule_primary(&config.schedule)
        .await
        .context("Failed to schedule backup")?;
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;

    notifier
        .notify(
            NOTIFICATION_TITLE,
            &format!(
                "Backup daemon started for `{}` (schedule `{}`)",
                config.database.name, config.schedule
            ),
            INFO_COLOR,
        )
        .await;

    let shutdown_coordinator = ShutdownCoordinator::new();

    let console_handle = if args.no_console {
        None
    } else {
        Some(tokio::spawn(run_console(
            spawn_stdin_reader(),
            orchestrator.clone(),
            shutdown_coordinator.token(),
        )))
    };

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }

    if let Some(handle) = console_handle {
        if let Err(e) = handle.await {
            tracing::error!("Console task panicked: {}", e);
        }
    }

    finish_jobs(&orchestrator, SHUTDOWN_GRACE).await;

    tracing::info!("Backup daemon stopped");
    Ok(())
}
