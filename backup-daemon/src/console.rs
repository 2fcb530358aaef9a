//! Line-oriented manual command surface on standard input.
//!
//! Recognised verbs: `backup [database]`, `status`, `help`. Anything else is
//! logged and ignored. End of input stops the console, not the daemon.
//!
//! Stdin is read on a plain OS thread. A blocking read there cannot hold up
//! runtime shutdown; the thread simply dies with the process.

use crate::executor::BackupOrchestrator;
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Backup { database: Option<String> },
    Status,
    Help,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return ConsoleCommand::Empty;
        };

        match verb {
            "backup" => ConsoleCommand::Backup {
                database: parts.next().map(str::to_string),
            },
            "status" => ConsoleCommand::Status,
            "help" => ConsoleCommand::Help,
            other => ConsoleCommand::Unknown(other.to_string()),
        }
    }
}

/// Forward stdin lines into a channel from a dedicated thread. The channel
/// closes at end of input or on a read error.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);

    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to read command input");
                        break;
                    }
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        // rx sees a closed channel since tx was dropped with the closure
        warn!(error = %e, "Failed to start command input thread");
    }

    rx
}

/// Handle command lines until the channel closes or `cancel` fires. Manual
/// backups run on their own tasks; on end of input they are awaited before
/// returning, on cancellation they are left to the shutdown sequence.
pub async fn run_console(
    mut lines: mpsc::Receiver<String>,
    orchestrator: BackupOrchestrator,
    cancel: CancellationToken,
) {
    let mut jobs = JoinSet::new();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                jobs.detach_all();
                return;
            }
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            info!("Command input closed");
            break;
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Backup { database } => {
                info!("Manual backup initiated...");
                let orchestrator = orchestrator.clone();
                jobs.spawn(async move {
                    orchestrator.trigger(database.as_deref()).await;
                });
            }
            ConsoleCommand::Status => {
                let running = orchestrator.running_databases();
                let config = orchestrator.config();
                info!(
                    primary = %config.database.name,
                    schedule = %config.schedule,
                    backup_dir = %config.backup_dir.display(),
                    "Running backups: {}",
                    if running.is_empty() {
                        "none".to_string()
                    } else {
                        running.join(", ")
                    }
                );
            }
            ConsoleCommand::Help => {
                info!("Commands: backup [database] | status | help");
            }
            ConsoleCommand::Empty => {}
            ConsoleCommand::Unknown(verb) => {
                info!(command = %verb, "Unknown command.");
            }
        }

        // Reap finished manual jobs so the set does not grow unbounded.
        while let Some(done) = jobs.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "Manual backup task aborted");
            }
        }
    }

    while let Some(done) = jobs.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "Manual backup task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backup_default() {
        assert_eq!(
            ConsoleCommand::parse("backup"),
            ConsoleCommand::Backup { database: None }
        );
        assert_eq!(
            ConsoleCommand::parse("  backup   "),
            ConsoleCommand::Backup { database: None }
        );
    }

    #[test]
    fn test_parse_backup_with_database() {
        assert_eq!(
            ConsoleCommand::parse("backup analytics"),
            ConsoleCommand::Backup {
                database: Some("analytics".to_string())
            }
        );
        // Extra words are ignored
        assert_eq!(
            ConsoleCommand::parse("backup analytics now"),
            ConsoleCommand::Backup {
                database: Some("analytics".to_string())
            }
        );
    }

    #[test]
    fn test_parse_other_verbs() {
        assert_eq!(ConsoleCommand::parse("status"), ConsoleCommand::Status);
        assert_eq!(ConsoleCommand::parse("help"), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Empty);
        assert_eq!(ConsoleCommand::parse("   \t"), ConsoleCommand::Empty);
        assert_eq!(
            ConsoleCommand::parse("restore shop"),
            ConsoleCommand::Unknown("restore".to_string())
        );
        // Verbs are case sensitive
        assert_eq!(
            ConsoleCommand::parse("BACKUP"),
            ConsoleCommand::Unknown("BACKUP".to_string())
        );
    }
}
