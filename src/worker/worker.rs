//! The `Worker` abstraction and its lifecycle driver.
//!
//! A worker implements [`Worker`]: it embeds a [`WorkerCore`], supplies
//! `execute` and `progress_percent`, and optionally overrides the other hooks.
//! The lifecycle itself (`initialize`, `run`, failure handling, status
//! notifications) is provided by [`WorkerExt`] and is the same for every
//! worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::worker::base::WorkerCore;
use crate::worker::state::WorkerStatus;

/// Upcast to `&dyn Worker`, so status events can carry their source even
/// when the lifecycle runs through an unsized receiver.
pub trait AsWorker {
    fn as_worker(&self) -> &dyn Worker;
}

impl<W: Worker> AsWorker for W {
    fn as_worker(&self) -> &dyn Worker {
        self
    }
}

/// A cancellable, observable, stateful unit of work.
///
/// Workers are not reusable: `run` succeeds at most once per instance.
/// Cancellation is cooperative, so a long `execute` should poll
/// `self.core().is_running()` and return early once it turns false.
#[async_trait]
pub trait Worker: AsWorker + Send + Sync + 'static {
    /// Lifecycle state of this worker.
    fn core(&self) -> &WorkerCore;

    /// Name used in logs. Defaults to the implementing type's name.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// First initialization step.
    async fn validate_input(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Second initialization step: acquire resources.
    async fn create_internal_variables(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Third initialization step: set up internal state.
    async fn initialize_internal_variables(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_execute(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self) -> anyhow::Result<()>;

    async fn after_execute(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called as soon as the worker becomes `Completed`.
    fn on_completed(&self) {}

    /// Called as soon as the worker becomes `Failed`.
    fn on_failed(&self) {}

    /// Called as soon as the worker becomes `Aborted`.
    fn on_aborted(&self) {}

    /// Called once `run` is over, whatever the outcome.
    fn on_end(&self) {}

    /// Release resources held by this worker. May be called more than once.
    fn release(&self) {}

    /// Force the worker to `Aborted` and release its resources.
    fn abort(&self) {
        self.change_status(WorkerStatus::Aborted);
        self.release();
    }

    /// Completion percentage.
    fn progress_percent(&self) -> u32;
}

/// Error wrapper that lets a parent re-raise a child's failure while keeping
/// the very same cause.
#[derive(Debug, Clone)]
pub struct SharedFailure(pub Arc<anyhow::Error>);

impl SharedFailure {
    pub fn into_inner(self) -> Arc<anyhow::Error> {
        self.0
    }
}

impl std::fmt::Display for SharedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        (**self.0).source()
    }
}

/// Serializable point-in-time view of a worker, for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: WorkerStatus,
    pub progress_percent: u32,
    pub weight: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

/// Lifecycle operations available on every [`Worker`].
#[async_trait]
pub trait WorkerExt: Worker {
    /// Validate input, acquire resources and set up internal state, in that
    /// order. Errors are recorded on the worker, which becomes `Failed`;
    /// check `core().is_pending()` afterwards before calling [`run`](Self::run).
    async fn initialize(&self);

    /// Execute the worker. Fails only if the worker is not `Pending`; any
    /// error raised by the worker itself is recorded on it instead.
    async fn run(&self) -> Result<(), WorkerError>;

    /// Wait until the worker ends or `timeout` elapses. Returns `true` only
    /// if it ended `Completed`.
    async fn wait_for(&self, timeout: Duration) -> bool;

    /// Apply a status transition, notify listeners and fire the matching
    /// status hook. Returns `false` if the transition is not allowed from the
    /// current status.
    fn change_status(&self, to: WorkerStatus) -> bool;

    /// Record `err` as this worker's failure and move it to `Failed`.
    fn fail(&self, err: anyhow::Error);

    /// Move to `Failed` with only a message and no captured cause.
    fn fail_with_message(&self, message: Option<String>) -> bool;

    /// Abort if running, then release resources.
    fn destroy(&self);

    fn snapshot(&self) -> WorkerSnapshot;
}

#[async_trait]
impl<W: Worker + ?Sized> WorkerExt for W {
    async fn initialize(&self) {
        let core = self.core();
        if !core.is_pending() {
            debug!(worker = %self.name(), id = %core.id(), status = %core.status(), "Skipping initialization");
            return;
        }
        debug!(worker = %self.name(), id = %core.id(), "Initializing");

        let result: anyhow::Result<()> = async {
            self.validate_input().await?;
            if core.is_pending() {
                self.create_internal_variables().await?;
            }
            if core.is_pending() {
                self.initialize_internal_variables().await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.fail(err);
        }
    }

    async fn run(&self) -> Result<(), WorkerError> {
        let core = self.core();
        if !self.change_status(WorkerStatus::Running) {
            return Err(WorkerError::AlreadyStarted {
                id: core.id(),
                status: core.status(),
            });
        }
        core.record_start();
        debug!(worker = %self.name(), id = %core.id(), "Started");

        let steps = async {
            self.before_execute().await?;
            if core.is_running() {
                self.execute().await?;
            }
            if core.is_running() {
                self.after_execute().await?;
            }
            anyhow::Ok(())
        };
        let outcome = match AssertUnwindSafe(steps).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "worker panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        core.record_end();
        match outcome {
            Ok(()) => {
                self.change_status(WorkerStatus::Completed);
            }
            Err(err) => self.fail(err),
        }

        debug!(
            worker = %self.name(),
            id = %core.id(),
            status = %core.status(),
            "Finished in {:.1} sec",
            core.duration().unwrap_or_default().as_secs_f64()
        );
        self.on_end();
        Ok(())
    }

    async fn wait_for(&self, timeout: Duration) -> bool {
        self.core().wait_for(timeout).await
    }

    fn change_status(&self, to: WorkerStatus) -> bool {
        let core = self.core();
        let Some(from) = core.transition(to) else {
            return false;
        };
        core.notify_listeners(self.as_worker(), from, to);
        match to {
            WorkerStatus::Completed => self.on_completed(),
            WorkerStatus::Failed => self.on_failed(),
            WorkerStatus::Aborted => self.on_aborted(),
            WorkerStatus::Pending | WorkerStatus::Running => {}
        }
        true
    }

    fn fail(&self, err: anyhow::Error) {
        let core = self.core();
        let cause = match err.downcast::<SharedFailure>() {
            Ok(shared) => shared.into_inner(),
            Err(err) => Arc::new(err),
        };
        let message = cause.to_string();

        match core.transition_to_failed(Some(message), Some(Arc::clone(&cause))) {
            Some(from) => {
                error!(
                    worker = %self.name(),
                    id = %core.id(),
                    status = %from,
                    error = %format!("{cause:#}"),
                    "Error running worker"
                );
                core.notify_listeners(self.as_worker(), from, WorkerStatus::Failed);
                self.on_failed();
            }
            None => {
                warn!(
                    worker = %self.name(),
                    id = %core.id(),
                    status = %core.status(),
                    error = %format!("{cause:#}"),
                    "Ignoring error raised after the worker ended"
                );
            }
        }
    }

    fn fail_with_message(&self, message: Option<String>) -> bool {
        let core = self.core();
        match core.transition_to_failed(message, None) {
            Some(from) => {
                warn!(
                    worker = %self.name(),
                    id = %core.id(),
                    error = core.error_message().as_deref().unwrap_or("unknown"),
                    "Worker failed"
                );
                core.notify_listeners(self.as_worker(), from, WorkerStatus::Failed);
                self.on_failed();
                true
            }
            None => false,
        }
    }

    fn destroy(&self) {
        if self.core().is_running() {
            self.abort();
        }
        self.release();
    }

    fn snapshot(&self) -> WorkerSnapshot {
        let core = self.core();
        WorkerSnapshot {
            id: core.id(),
            name: self.name().to_string(),
            status: core.status(),
            progress_percent: self.progress_percent(),
            weight: core.weight(),
            start_time: core.start_time(),
            end_time: core.end_time(),
            duration_ms: core.duration().map(|d| d.as_millis() as u64),
            error_message: core.error_message(),
        }
    }
}

/// `my_crate::jobs::ImportJob<T>` -> `ImportJob`.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
