//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal the shared cancellation token fires; the scheduler stops
//! ticking, the console stops reading, and in-flight jobs get a grace period
//! to finish (and clean up after themselves) before the process exits.

use crate::executor::{BackupOrchestrator, NOTIFICATION_TITLE};
use crate::notify::{FAILURE_COLOR, INFO_COLOR};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight backups may keep running after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGTERM or SIGINT, then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {}
        }

        self.token.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait up to `grace` for running backups, then send the final notification.
///
/// Backups still running when the grace period ends have their artifacts
/// removed so no truncated `.sql` file outlives the process; those paths are
/// returned. Exactly one stop notification is sent either way.
pub async fn finish_jobs(orchestrator: &BackupOrchestrator, grace: Duration) -> Vec<PathBuf> {
    let deadline = tokio::time::Instant::now() + grace;
    while !orchestrator.is_idle() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let unfinished = orchestrator.running_databases();
    let discarded = orchestrator.discard_in_flight().await;

    if unfinished.is_empty() && discarded.is_empty() {
        orchestrator
            .notifier()
            .notify(NOTIFICATION_TITLE, "Backup daemon stopped", INFO_COLOR)
            .await;
        return discarded;
    }

    warn!(
        databases = %unfinished.join(", "),
        "Exiting with backups still running"
    );
    for path in &discarded {
        warn!("Discarded unfinished backup {}", path.display());
    }

    let names = if unfinished.is_empty() {
        discarded
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    } else {
        unfinished
    };
    orchestrator
        .notifier()
        .notify(
            NOTIFICATION_TITLE,
            &format!(
                "`🔴` Backup daemon stopped while backing up `{}`",
                names.join("`, `")
            ),
            FAILURE_COLOR,
        )
        .await;

    discarded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        // Spawn a task that will observe shutdown
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        // Simulate shutdown from elsewhere in the process
        coordinator.token().cancel();
        coordinator.wait_for_signal().await;

        handle.await.unwrap();
    }
}
