//! Worker lifecycle framework.
//!
//! Core components:
//! - `state` — status state machine (Pending → Running → Completed/Failed/Aborted)
//! - `base` — `WorkerCore`, the state every worker embeds
//! - `worker` — `Worker` hooks and the `WorkerExt` lifecycle driver
//! - `task` — item-counting workers
//! - `job` — workers running an ordered list of tasks
//! - `registry` — factories by kind
//! - `manager` — starting, locking and tracking jobs

pub mod base;
pub mod job;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod state;
pub mod task;
pub mod worker;

pub use base::WorkerCore;
pub use job::{Job, JobDefinition};
pub use listener::{ListenerId, StatusChangeEvent, StatusChangeListener};
pub use manager::{JobManager, JobSummary, StartOptions};
pub use registry::WorkerRegistry;
pub use state::WorkerStatus;
pub use task::{ItemCounters, Task, TaskBody, TaskContext, UNKNOWN_TOTAL};
pub use worker::{AsWorker, SharedFailure, Worker, WorkerExt, WorkerSnapshot};
