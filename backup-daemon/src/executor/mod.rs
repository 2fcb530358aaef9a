//! Backup orchestrator - drives a single dump from trigger to notification.
//!
//! A job goes `Idle -> Running -> {Succeeded, Failed}`:
//! - the artifact path is derived from the job's timestamp and tag
//! - the dump utility's stdout is streamed into a freshly created file
//! - on any failure the partial file is removed
//! - exactly one webhook message is sent per job

pub mod job;
pub mod runner;

pub use job::{BackupJob, DumpCommand, JobTag};
pub use runner::CommandRunner;

use crate::config::AppConfig;
use crate::notify::{Notifier, FAILURE_COLOR, SUCCESS_COLOR};
use crate::utils::errors::BackupError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tracing::{error, info, warn};

pub const NOTIFICATION_TITLE: &str = "Database Backup";

/// Result of one backup attempt, consumed by the notifier and the caller.
#[derive(Debug)]
pub struct JobOutcome {
    pub database: String,
    pub tag: Option<JobTag>,
    pub artifact: PathBuf,
    pub duration: Duration,
    pub bytes: u64,
    pub error: Option<BackupError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn tag_suffix(&self) -> String {
        self.tag.map(|t| format!(" ({})", t)).unwrap_or_default()
    }

    /// Human-readable webhook description.
    pub fn description(&self) -> String {
        match &self.error {
            None => format!(
                "`🟢` Backup of `{}` created{} in {:.2} seconds",
                self.database,
                self.tag_suffix(),
                self.duration.as_secs_f64()
            ),
            Some(e) => format!(
                "`🔴` Backup of `{}` failed{}: {}",
                self.database,
                self.tag_suffix(),
                e
            ),
        }
    }

    pub fn color(&self) -> u32 {
        if self.is_success() {
            SUCCESS_COLOR
        } else {
            FAILURE_COLOR
        }
    }
}

/// Number of jobs in flight per database. More than one only when
/// overlapping runs are allowed.
type RunningSet = Arc<Mutex<HashMap<String, usize>>>;

/// Releases one job's slot in the running set when the job ends, even if
/// the job task panics.
struct RunningGuard {
    running: RunningSet,
    database: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = running.get_mut(&self.database) {
            *count -= 1;
            if *count == 0 {
                running.remove(&self.database);
            }
        }
    }
}

/// Shared by the scheduler and the console; cheap to clone.
#[derive(Clone)]
pub struct BackupOrchestrator {
    config: Arc<AppConfig>,
    runner: CommandRunner,
    notifier: Notifier,
    running: RunningSet,
    /// Artifacts currently being written.
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BackupOrchestrator {
    pub fn new(config: Arc<AppConfig>, notifier: Notifier) -> Self {
        let runner = CommandRunner::new(config.dump.timeout);
        Self {
            config,
            runner,
            notifier,
            running: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The requested name verbatim, or the configured primary database.
    pub fn resolve_database(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .unwrap_or_else(|| self.config.database.name.clone())
    }

    /// Databases that currently have a job running, sorted.
    pub fn running_databases(&self) -> Vec<String> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = running.keys().cloned().collect();
        names.sort();
        names
    }

    /// No triggered job is running and no artifact is being written.
    pub fn is_idle(&self) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        running.is_empty() && in_flight.is_empty()
    }

    /// Claim a slot for `database`. Fails when a job is already running for
    /// it and overlapping runs are not allowed.
    fn acquire(&self, database: &str) -> Option<RunningGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let count = running.entry(database.to_string()).or_insert(0);
        if *count > 0 && !self.config.allow_overlap {
            return None;
        }
        *count += 1;
        Some(RunningGuard {
            running: self.running.clone(),
            database: database.to_string(),
        })
    }

    /// Entry point for triggers. Resolves the database name and, unless
    /// overlapping runs are allowed, skips when a job for the same database
    /// is still in flight. Returns `None` for a skipped trigger.
    pub async fn trigger(&self, requested: Option<&str>) -> Option<JobOutcome> {
        let database = self.resolve_database(requested);

        let Some(guard) = self.acquire(&database) else {
            warn!(database = %database, "Skipping backup: job already running");
            return None;
        };

        let outcome = self.backup(&database).await;
        drop(guard);
        Some(outcome)
    }

    /// Run one backup of `database` and report it. Always sends exactly one
    /// notification; never returns an error.
    pub async fn backup(&self, database: &str) -> JobOutcome {
        let job = BackupJob::new(&self.config, database);
        let artifact = job.artifact_path();

        info!(
            database = %job.database,
            tag = %job.tag.map(|t| t.to_string()).unwrap_or_default(),
            started_at = %job.started_at.to_rfc3339(),
            "Backing up database to {}",
            artifact.display()
        );

        let start = Instant::now();
        let result = self.execute(&job, &artifact).await;
        let duration = start.elapsed();

        let (bytes, error) = match result {
            Ok(bytes) => {
                info!(
                    database = %job.database,
                    bytes,
                    "Backup created successfully: {} in {:.2} seconds",
                    artifact.display(),
                    duration.as_secs_f64()
                );
                (bytes, None)
            }
            Err(e) => {
                error!(
                    database = %job.database,
                    error = %e,
                    "Error taking backup of {}",
                    job.label()
                );
                (0, Some(e))
            }
        };

        let outcome = JobOutcome {
            database: job.database.clone(),
            tag: job.tag,
            artifact,
            duration,
            bytes,
            error,
        };

        self.notifier
            .notify(NOTIFICATION_TITLE, &outcome.description(), outcome.color())
            .await;

        outcome
    }

    /// Create the artifact, stream the dump into it and remove it again if
    /// anything goes wrong after creation.
    async fn execute(&self, job: &BackupJob, artifact: &Path) -> Result<u64, BackupError> {
        // create_new: never clobber another job's artifact
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(artifact)
            .await
            .map_err(|source| BackupError::Artifact {
                path: artifact.display().to_string(),
                source,
            })?;

        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(artifact.to_path_buf());

        let command = job.dump_command(&self.config.dump.binary, self.config.dump.password_via);
        info!(label = %job.label(), "Running {}", command);

        let result = match self.runner.run(&command, &mut file).await {
            Ok(0) => Err(BackupError::EmptyDump),
            Ok(bytes) => file
                .sync_all()
                .await
                .map(|_| bytes)
                .map_err(|source| BackupError::Artifact {
                    path: artifact.display().to_string(),
                    source,
                }),
            Err(e) => Err(e.into()),
        };
        drop(file);

        if result.is_err() {
            remove_partial(artifact).await;
        }
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(artifact);
        result
    }

    /// Remove artifacts of jobs that are still running. Used when the daemon
    /// exits before they finish; returns the removed paths.
    pub async fn discard_in_flight(&self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.drain().collect()
        };
        for path in &paths {
            remove_partial(path).await;
        }
        paths
    }
}

/// Delete a failed job's artifact. Missing is fine; any other error is
/// reported loudly since a truncated `.sql` file must not survive.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed partial backup file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(
            error = %e,
            "Failed to remove partial backup file {}",
            path.display()
        ),
    }
}
