//! Jobs: workers that run an ordered list of child workers one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::worker::base::{WorkerCore, lock};
use crate::worker::registry::WorkerRegistry;
use crate::worker::state::WorkerStatus;
use crate::worker::worker::{SharedFailure, Worker, WorkerExt, short_type_name};

/// Application-supplied behavior of a [`Job`].
///
/// `build_tasks` is the only required step. It runs while the job is being
/// initialized and should populate the job with [`Job::add_task`].
#[async_trait]
pub trait JobDefinition: Send + Sync + 'static {
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn validate_input(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_internal_variables(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn build_tasks(&self, job: &Job) -> anyhow::Result<()>;

    async fn before_execute(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_execute(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    /// A task ended `Completed`.
    fn on_task_completed(&self, _job: &Job, _task: &Arc<dyn Worker>) {}

    /// A task ended `Failed`; the job is about to fail with it.
    fn on_task_failed(&self, _job: &Job, _task: &Arc<dyn Worker>) {}

    /// A task ended, whatever the outcome.
    fn on_task_end(&self, _job: &Job, _task: &Arc<dyn Worker>) {}

    fn on_completed(&self, _job: &Job) {}

    fn on_failed(&self, _job: &Job) {}

    fn on_aborted(&self, _job: &Job) {}

    fn on_end(&self, _job: &Job) {}

    fn release(&self) {}
}

/// Executes a series of tasks in order.
///
/// Tasks can only be added while the job is pending. Aborting a job aborts
/// the task currently running; releasing it releases every task.
pub struct Job {
    core: WorkerCore,
    definition: Box<dyn JobDefinition>,
    tasks: RwLock<Vec<Arc<dyn Worker>>>,
    current_task_index: Mutex<Option<usize>>,
    tasks_built: AtomicBool,
    submitted: AtomicBool,
    registry: OnceLock<Arc<WorkerRegistry>>,
}

impl Job {
    pub fn new(definition: impl JobDefinition) -> Self {
        Self {
            core: WorkerCore::new(),
            definition: Box::new(definition),
            tasks: RwLock::new(Vec::new()),
            current_task_index: Mutex::new(None),
            tasks_built: AtomicBool::new(false),
            submitted: AtomicBool::new(false),
            registry: OnceLock::new(),
        }
    }

    /// Registry used by [`create_task`](Self::create_task).
    pub fn with_registry(self, registry: Arc<WorkerRegistry>) -> Self {
        self.set_registry(registry);
        self
    }

    pub(crate) fn set_registry(&self, registry: Arc<WorkerRegistry>) {
        let _ = self.registry.set(registry);
    }

    /// Whether a [`JobManager`](crate::worker::JobManager) accepted this job
    /// for running.
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    /// Claim the job for a single run. Returns `false` if it was already
    /// claimed.
    pub(crate) fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_submitted(&self) {
        self.submitted.store(false, Ordering::Release);
    }

    pub fn definition(&self) -> &dyn JobDefinition {
        self.definition.as_ref()
    }

    /// Append a task. Fails once the job has left `Pending`.
    pub fn add_task(&self, task: Arc<dyn Worker>) -> Result<(), WorkerError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let status = self.core.status();
        if status != WorkerStatus::Pending {
            return Err(WorkerError::JobAlreadyStarted {
                id: self.core.id(),
                status,
            });
        }
        tasks.push(task);
        Ok(())
    }

    pub fn add_tasks<I>(&self, tasks: I) -> Result<(), WorkerError>
    where
        I: IntoIterator<Item = Arc<dyn Worker>>,
    {
        for task in tasks {
            self.add_task(task)?;
        }
        Ok(())
    }

    /// Create a task of the given kind through the registry.
    pub fn create_task(&self, kind: &str) -> Result<Arc<dyn Worker>, WorkerError> {
        let registry = self
            .registry
            .get()
            .ok_or(WorkerError::NoRegistry { id: self.core.id() })?;
        registry.create_worker(kind)
    }

    /// Create a task of the given kind and append it.
    pub fn add_new_task(&self, kind: &str) -> Result<Arc<dyn Worker>, WorkerError> {
        let task = self.create_task(kind)?;
        self.add_task(Arc::clone(&task))?;
        Ok(task)
    }

    pub fn tasks(&self) -> Vec<Arc<dyn Worker>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn task_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn task(&self, id: Uuid) -> Option<Arc<dyn Worker>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|task| task.core().id() == id)
            .cloned()
    }

    /// Index of the task currently running (or last run); `None` before the
    /// first one starts.
    pub fn current_task_index(&self) -> Option<usize> {
        *lock(&self.current_task_index)
    }

    pub fn current_task(&self) -> Option<Arc<dyn Worker>> {
        let index = self.current_task_index()?;
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Advance to the next task, if the job is still running and one is left.
    fn next_task(&self) -> Option<Arc<dyn Worker>> {
        if !self.core.is_running() {
            return None;
        }
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut index = lock(&self.current_task_index);
        let next = index.map_or(0, |i| i + 1);
        let task = tasks.get(next)?;
        *index = Some(next);
        Some(Arc::clone(task))
    }

    async fn run_task(&self, task: &Arc<dyn Worker>) -> anyhow::Result<()> {
        task.initialize().await;
        if task.core().is_pending() {
            task.run().await?;
        }

        match task.core().status() {
            WorkerStatus::Completed => {
                self.definition.on_task_completed(self, task);
            }
            WorkerStatus::Failed => {
                self.definition.on_task_failed(self, task);
                match task.core().last_failure() {
                    Some(cause) => return Err(anyhow::Error::new(SharedFailure(cause))),
                    None => {
                        self.fail_with_message(task.core().error_message());
                    }
                }
            }
            WorkerStatus::Aborted => {
                info!(
                    job = %self.name(),
                    task = %task.name(),
                    "Task aborted, aborting job"
                );
                self.abort();
            }
            WorkerStatus::Pending | WorkerStatus::Running => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for Job {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn name(&self) -> &str {
        self.definition.name()
    }

    async fn validate_input(&self) -> anyhow::Result<()> {
        self.definition.validate_input(self).await
    }

    async fn create_internal_variables(&self) -> anyhow::Result<()> {
        self.definition.create_internal_variables(self).await
    }

    /// Builds the tasks, once.
    async fn initialize_internal_variables(&self) -> anyhow::Result<()> {
        if self.tasks_built.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.definition.build_tasks(self).await?;
        debug!(job = %self.name(), id = %self.core.id(), tasks = self.task_count(), "Tasks built");
        Ok(())
    }

    async fn before_execute(&self) -> anyhow::Result<()> {
        self.definition.before_execute(self).await
    }

    /// Runs each task in order, stopping as soon as one fails or aborts.
    async fn execute(&self) -> anyhow::Result<()> {
        while let Some(task) = self.next_task() {
            let outcome = self.run_task(&task).await;
            self.definition.on_task_end(self, &task);
            outcome?;
        }
        Ok(())
    }

    async fn after_execute(&self) -> anyhow::Result<()> {
        self.definition.after_execute(self).await
    }

    fn on_completed(&self) {
        self.definition.on_completed(self);
    }

    fn on_failed(&self) {
        self.definition.on_failed(self);
    }

    fn on_aborted(&self) {
        self.definition.on_aborted(self);
    }

    fn on_end(&self) {
        self.definition.on_end(self);
    }

    /// Releases the job's own resources, then every task's, including tasks
    /// that never ran.
    fn release(&self) {
        self.definition.release();
        for task in self.tasks() {
            task.release();
        }
    }

    fn abort(&self) {
        self.change_status(WorkerStatus::Aborted);
        self.release();
        if let Some(task) = self.current_task() {
            task.abort();
        }
    }

    /// Weighted average of the tasks' progress, floored.
    fn progress_percent(&self) -> u32 {
        match self.core.status() {
            WorkerStatus::Completed => 100,
            WorkerStatus::Pending => 0,
            _ => {
                if self.current_task_index().is_none() {
                    return 0;
                }
                let tasks = self.tasks();
                let total_weight: u64 = tasks.iter().map(|t| u64::from(t.core().weight())).sum();
                if total_weight == 0 {
                    return 0;
                }
                let weighted: u64 = tasks
                    .iter()
                    .map(|t| u64::from(t.progress_percent()) * u64::from(t.core().weight()))
                    .sum();
                (weighted / total_weight) as u32
            }
        }
    }
}
