//! Backup Daemon Library
//!
//! Scheduled database dumps with webhook status notifications.

pub mod config;
pub mod console;
pub mod daemon;
pub mod executor;
pub mod notify;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use executor::{BackupOrchestrator, JobOutcome};
pub use notify::Notifier;
pub use utils::errors::{BackupError, ConfigError, ExecutionError, NotificationError};
