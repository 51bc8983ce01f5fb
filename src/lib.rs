//! jobflow — cancellable, observable units of work.
//!
//! A [`Worker`] moves through `Pending → Running → Completed | Failed |
//! Aborted`, notifying listeners on every transition. A [`Task`] counts the
//! items it processes; a [`Job`] runs tasks one after another and fails or
//! aborts with them. The [`JobManager`] starts jobs inline or in the
//! background and keeps at most one job running per lock group.

pub mod batch;
pub mod config;
pub mod error;
pub mod progress;
pub mod worker;

pub use batch::{BatchExecutor, BatchProcessor};
pub use config::JobManagerConfig;
pub use error::{ConfigError, Error, Result, WorkerError};
pub use progress::{
    NullProgressListener, ProcessProgressListener, ProcessStepProgressListener, Progress,
    ProgressListener,
};
pub use worker::{
    Job, JobDefinition, JobManager, JobSummary, StartOptions, Task, TaskBody, TaskContext,
    Worker, WorkerCore, WorkerExt, WorkerRegistry, WorkerSnapshot, WorkerStatus,
};
