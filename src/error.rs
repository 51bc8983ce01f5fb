//! Error types for jobflow.
//!
//! Operational failures raised inside worker hooks are plain `anyhow::Error`s
//! and never leave the worker: they are recorded on it and turn its status to
//! `Failed`. The types below are the hard failures returned to callers.

use uuid::Uuid;

use crate::worker::WorkerStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Precondition violations raised by workers, jobs and the job manager.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {id} already run (status: {status})")]
    AlreadyStarted { id: Uuid, status: WorkerStatus },

    #[error("Cannot add tasks to job {id} once started (status: {status})")]
    JobAlreadyStarted { id: Uuid, status: WorkerStatus },

    #[error("Another job is running for the same locking group: {lock_id} (job {holder})")]
    LockConflict { lock_id: String, holder: Uuid },

    #[error("No factory registered for {category} kind '{kind}'")]
    UnknownKind { category: &'static str, kind: String },

    #[error("Job {id} has no registry to create tasks from")]
    NoRegistry { id: Uuid },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflict_message_names_group() {
        let holder = Uuid::new_v4();
        let err = WorkerError::LockConflict {
            lock_id: "survey-42".to_string(),
            holder,
        };
        let msg = err.to_string();
        assert!(msg.contains("survey-42"));
        assert!(msg.contains(&holder.to_string()));
    }

    #[test]
    fn worker_error_converts_to_top_level() {
        let err: Error = WorkerError::UnknownKind {
            category: "job",
            kind: "import".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Worker(WorkerError::UnknownKind { .. })));
        assert_eq!(
            err.to_string(),
            "Worker error: No factory registered for job kind 'import'"
        );
    }
}
