//! Error types for the backup daemon.

use std::time::Duration;
use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures of a single dump process run.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dump exited with {}{}", exit_label(.code), stderr_suffix(.stderr_tail))]
    ExitStatus {
        code: Option<i32>,
        stderr_tail: Vec<String>,
    },

    #[error("failed to capture dump output: {0}")]
    Capture(#[source] std::io::Error),

    #[error("dump did not finish within {0:?}")]
    TimedOut(Duration),
}

impl ExecutionError {
    /// Exit code reported by the process, if it ran and exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::ExitStatus { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, ExecutionError::Spawn { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn stderr_suffix(tail: &[String]) -> String {
    match tail.last() {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

/// Why a backup job failed.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("could not create backup file {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("dump produced no output")]
    EmptyDump,
}

/// Webhook delivery failures. Logged, never escalated.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler error: {0}")]
    Cron(#[from] tokio_cron_scheduler::JobSchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_message_includes_last_stderr_line() {
        let err = ExecutionError::ExitStatus {
            code: Some(2),
            stderr_tail: vec![
                "warning: something".to_string(),
                "Got error: 1045: Access denied".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dump exited with code 2: Got error: 1045: Access denied"
        );
        assert_eq!(err.exit_code(), Some(2));
        assert!(!err.is_spawn_failure());
    }

    #[test]
    fn test_signal_exit_message() {
        let err = ExecutionError::ExitStatus {
            code: None,
            stderr_tail: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "dump exited with no exit code (terminated by signal)"
        );
    }

    #[test]
    fn test_backup_error_is_transparent_over_execution() {
        let err: BackupError = ExecutionError::TimedOut(Duration::from_secs(30)).into();
        assert_eq!(err.to_string(), "dump did not finish within 30s");
    }
}
