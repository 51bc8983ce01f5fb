//! Worker state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Created, possibly initialized, not yet run.
    Pending,
    /// `run()` is in progress.
    Running,
    /// Every execution step finished without error.
    Completed,
    /// An initialization or execution step raised an error.
    Failed,
    /// Cancelled by the owner or a supervising job.
    Aborted,
}

impl WorkerStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: WorkerStatus) -> bool {
        use WorkerStatus::*;

        matches!(
            (self, target),
            // From Pending
            (Pending, Running) | (Pending, Failed) | (Pending, Aborted) |
            // From Running
            (Running, Completed) | (Running, Failed) | (Running, Aborted)
        )
    }

    /// Completed, failed or aborted.
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    pub fn is_active(&self) -> bool {
        !self.is_ended()
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}
