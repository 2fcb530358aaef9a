//! Recurring backup trigger.
//!
//! Fires the primary database backup on the configured cron schedule (hourly,
//! on the hour, by default). Ticks missed while the daemon was down are not
//! replayed.

use crate::executor::BackupOrchestrator;
use crate::utils::errors::SchedulerError;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    orchestrator: BackupOrchestrator,
}

impl BackupScheduler {
    pub async fn new(orchestrator: BackupOrchestrator) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            orchestrator,
        })
    }

    /// Register the primary database backup under `cron_expression`
    /// (seconds-first, as produced by `config::normalize_schedule`).
    pub async fn schedule_primary(&self, cron_expression: &str) -> Result<(), SchedulerError> {
        let orchestrator = self.orchestrator.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                tracing::info!("Generating database backup...");
                // The job runs on its own task so a panic inside it is
                // contained there and the scheduler keeps ticking.
                let handle = tokio::spawn(async move { orchestrator.trigger(None).await });
                match handle.await {
                    Ok(Some(outcome)) if !outcome.is_success() => {
                        tracing::warn!(database = %outcome.database, "Scheduled backup failed");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Scheduled backup task aborted"),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(
            database = %self.orchestrator.config().database.name,
            cron = %cron_expression,
            "Backup scheduled"
        );
        Ok(())
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RawConfig, Secret};
    use crate::notify::Notifier;
    use std::sync::Arc;

    fn orchestrator() -> BackupOrchestrator {
        let config = AppConfig::from_raw(RawConfig {
            db_user: Some("u".into()),
            db_password: Some(Secret::new("p")),
            db_name: Some("shop".into()),
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..RawConfig::default()
        })
        .unwrap();
        let notifier = Notifier::new(config.webhook_url.clone());
        BackupOrchestrator::new(Arc::new(config), notifier)
    }

    #[tokio::test]
    async fn test_default_schedule_accepted() {
        let scheduler = BackupScheduler::new(orchestrator()).await.unwrap();
        scheduler.schedule_primary("0 0 * * * *").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let scheduler = BackupScheduler::new(orchestrator()).await.unwrap();
        assert!(scheduler.schedule_primary("0 61 * * * *").await.is_err());
    }
}
