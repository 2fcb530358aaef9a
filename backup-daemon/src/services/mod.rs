//! Long-running services driving the orchestrator.

pub mod backup_scheduler;
