//! Job manager: creates jobs, runs them inline or in the background, keeps at
//! most one job running per lock group and forgets jobs that ended long ago.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::JobManagerConfig;
use crate::error::WorkerError;
use crate::worker::base::lock;
use crate::worker::job::Job;
use crate::worker::registry::WorkerRegistry;
use crate::worker::state::WorkerStatus;
use crate::worker::worker::{Worker, WorkerExt, WorkerSnapshot};

/// How a job should be started.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Run on the Tokio runtime and return immediately (default), or run to
    /// completion before returning.
    pub run_async: bool,
    /// Lock group: at most one job runs per lock id.
    pub lock_id: Option<String>,
    /// Do not keep the job for later lookup by id.
    pub transient: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            run_async: true,
            lock_id: None,
            transient: false,
        }
    }
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }

    pub fn lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }
}

/// Bookkeeping for a started job.
struct JobInfo {
    job: Arc<Job>,
    idle: Duration,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ManagerState {
    jobs: HashMap<Uuid, JobInfo>,
    lock_owner: HashMap<String, Arc<Job>>,
}

impl ManagerState {
    fn holds_lock(&self, job_id: Uuid) -> bool {
        self.lock_owner.values().any(|job| job.core().id() == job_id)
    }

    /// Add `elapsed` to the idle time of every ended job that holds no lock,
    /// then evict those idle for longer than `max_idle`.
    fn prune(&mut self, elapsed: Duration, max_idle: Duration) -> usize {
        let idle_ids: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|(id, info)| info.job.core().is_ended() && !self.holds_lock(**id))
            .map(|(id, _)| *id)
            .collect();

        let mut evicted = 0;
        for id in idle_ids {
            let Some(info) = self.jobs.get_mut(&id) else {
                continue;
            };
            info.idle += elapsed;
            if info.idle > max_idle {
                self.jobs.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Releases a lock group when the job holding it stops running, whatever the
/// outcome, including a panic or the task being cancelled.
struct LockRelease {
    state: Arc<Mutex<ManagerState>>,
    lock_id: String,
    job_id: Uuid,
}

impl Drop for LockRelease {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let held = state
            .lock_owner
            .get(&self.lock_id)
            .is_some_and(|holder| holder.core().id() == self.job_id);
        if held {
            state.lock_owner.remove(&self.lock_id);
            tracing::debug!(lock_id = %self.lock_id, job = %self.job_id, "Lock released");
        }
    }
}

/// Count of tracked jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Lock groups currently held.
    pub locks: usize,
}

/// Creates, starts and tracks jobs.
pub struct JobManager {
    config: JobManagerConfig,
    registry: Arc<WorkerRegistry>,
    state: Arc<Mutex<ManagerState>>,
    permits: Option<Arc<Semaphore>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// Create a manager. When called inside a Tokio runtime, this also spawns
    /// the idle-job sweep.
    pub fn new(config: JobManagerConfig, registry: Arc<WorkerRegistry>) -> Self {
        let state = Arc::new(Mutex::new(ManagerState::default()));
        let permits = config
            .max_concurrent_jobs
            .map(|max| Arc::new(Semaphore::new(max)));

        let sweep = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(spawn_idle_sweep(
                &runtime,
                Arc::clone(&state),
                config.sweep_interval,
                config.max_job_idle,
            )),
            Err(_) => {
                tracing::warn!("No Tokio runtime, idle jobs will only be pruned on demand");
                None
            }
        };

        Self {
            config,
            registry,
            state,
            permits,
            sweep: Mutex::new(sweep),
        }
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Create a job of `kind`, able to create its own tasks by kind.
    pub fn create_job(&self, kind: &str) -> Result<Job, WorkerError> {
        WorkerRegistry::create_job_in(&self.registry, kind)
    }

    pub fn create_worker(&self, kind: &str) -> Result<Arc<dyn Worker>, WorkerError> {
        self.registry.create_worker(kind)
    }

    /// Start `job` in the background.
    pub async fn start(&self, job: Arc<Job>) -> Result<(), WorkerError> {
        self.start_with_options(job, StartOptions::default()).await
    }

    /// Start `job`, in the background if `run_async`, otherwise running it to
    /// completion before returning.
    pub async fn start_with(&self, job: Arc<Job>, run_async: bool) -> Result<(), WorkerError> {
        self.start_with_options(job, StartOptions::new().run_async(run_async))
            .await
    }

    /// Start `job` in the background under lock group `lock_id`.
    pub async fn start_locked(
        &self,
        job: Arc<Job>,
        lock_id: impl Into<String>,
    ) -> Result<(), WorkerError> {
        self.start_with_options(job, StartOptions::new().lock_id(lock_id))
            .await
    }

    pub async fn start_locked_with(
        &self,
        job: Arc<Job>,
        lock_id: impl Into<String>,
        run_async: bool,
    ) -> Result<(), WorkerError> {
        self.start_with_options(
            job,
            StartOptions::new().lock_id(lock_id).run_async(run_async),
        )
        .await
    }

    /// Initialize `job` and, unless that failed, run it.
    ///
    /// Fails with [`WorkerError::AlreadyStarted`] when the job was already
    /// submitted (queued or running), and with [`WorkerError::LockConflict`]
    /// when another job that has not ended holds the requested lock. A job
    /// whose initialization fails is not run and the call still succeeds; the
    /// job reports `Failed`.
    pub async fn start_with_options(
        &self,
        job: Arc<Job>,
        options: StartOptions,
    ) -> Result<(), WorkerError> {
        let job_id = job.core().id();
        if !job.mark_submitted() {
            return Err(WorkerError::AlreadyStarted {
                id: job_id,
                status: job.core().status(),
            });
        }
        job.set_registry(Arc::clone(&self.registry));

        if !options.transient {
            lock(&self.state).jobs.entry(job_id).or_insert_with(|| JobInfo {
                job: Arc::clone(&job),
                idle: Duration::ZERO,
                handle: None,
            });
        }

        job.initialize().await;
        if !job.core().is_pending() {
            tracing::info!(
                job = %job.name(),
                id = %job_id,
                status = %job.core().status(),
                error = job.core().error_message().as_deref().unwrap_or(""),
                "Job not started"
            );
            return Ok(());
        }

        let release = match options.lock_id {
            Some(lock_id) => match self.acquire_lock(&job, lock_id) {
                Ok(release) => Some(release),
                Err(err) => {
                    // Not submitted after all: the caller may retry later.
                    job.clear_submitted();
                    return Err(err);
                }
            },
            None => None,
        };

        tracing::info!(job = %job.name(), id = %job_id, run_async = options.run_async, "Starting job");

        if !options.run_async {
            let _release = release;
            return job.run().await;
        }

        let permits = self.permits.clone();
        let runner = Arc::clone(&job);
        let handle = tokio::spawn(async move {
            let _release = release;
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        tracing::debug!(job = %runner.name(), "Job pool closed, job not run");
                        return;
                    }
                },
                None => None,
            };
            if !runner.core().is_pending() {
                tracing::debug!(
                    job = %runner.name(),
                    status = %runner.core().status(),
                    "Job ended while queued"
                );
                return;
            }
            if let Err(err) = runner.run().await {
                tracing::warn!(job = %runner.name(), error = %err, "Job could not run");
            }
        });

        if !options.transient
            && let Some(info) = lock(&self.state).jobs.get_mut(&job_id)
        {
            info.handle = Some(handle);
        }
        Ok(())
    }

    fn acquire_lock(&self, job: &Arc<Job>, lock_id: String) -> Result<LockRelease, WorkerError> {
        let job_id = job.core().id();
        let mut state = lock(&self.state);
        if let Some(holder) = state.lock_owner.get(&lock_id)
            && holder.core().id() != job_id
            && !holder.core().is_ended()
        {
            tracing::warn!(lock_id = %lock_id, holder = %holder.core().id(), job = %job_id, "Lock conflict");
            return Err(WorkerError::LockConflict {
                lock_id,
                holder: holder.core().id(),
            });
        }
        state.lock_owner.insert(lock_id.clone(), Arc::clone(job));
        tracing::info!(lock_id = %lock_id, job = %job_id, "Lock acquired");

        Ok(LockRelease {
            state: Arc::clone(&self.state),
            lock_id,
            job_id,
        })
    }

    /// A tracked job, by id.
    pub fn job(&self, id: Uuid) -> Option<Arc<Job>> {
        lock(&self.state).jobs.get(&id).map(|info| Arc::clone(&info.job))
    }

    /// The job currently holding `lock_id`, if any.
    pub fn locking_job(&self, lock_id: &str) -> Option<Arc<Job>> {
        lock(&self.state).lock_owner.get(lock_id).cloned()
    }

    pub fn job_ids(&self) -> Vec<Uuid> {
        lock(&self.state).jobs.keys().copied().collect()
    }

    /// Snapshots of every tracked job.
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let jobs: Vec<Arc<Job>> = lock(&self.state)
            .jobs
            .values()
            .map(|info| Arc::clone(&info.job))
            .collect();
        jobs.iter().map(|job| job.snapshot()).collect()
    }

    pub fn summary(&self) -> JobSummary {
        let state = lock(&self.state);
        let mut summary = JobSummary {
            total: state.jobs.len(),
            locks: state.lock_owner.len(),
            ..JobSummary::default()
        };
        for info in state.jobs.values() {
            match info.job.core().status() {
                WorkerStatus::Pending => summary.pending += 1,
                WorkerStatus::Running => summary.running += 1,
                WorkerStatus::Completed => summary.completed += 1,
                WorkerStatus::Failed => summary.failed += 1,
                WorkerStatus::Aborted => summary.aborted += 1,
            }
        }
        summary
    }

    /// Age ended jobs by `elapsed` and forget those idle for longer than the
    /// configured maximum. Returns how many were forgotten.
    pub fn prune_idle_jobs(&self, elapsed: Duration) -> usize {
        lock(&self.state).prune(elapsed, self.config.max_job_idle)
    }

    /// Stop the idle sweep, abort every running or queued job and wait up to
    /// the configured grace period for them to end. Jobs still waiting for a
    /// pool slot never start.
    pub async fn shutdown(&self) {
        if let Some(sweep) = lock(&self.sweep).take() {
            sweep.abort();
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }

        let (jobs, handles) = {
            let mut state = lock(&self.state);
            let mut jobs: Vec<Arc<Job>> = state.lock_owner.values().cloned().collect();
            let mut handles = Vec::new();
            for info in state.jobs.values_mut() {
                jobs.push(Arc::clone(&info.job));
                handles.extend(info.handle.take());
            }
            (jobs, handles)
        };

        let mut aborted = 0;
        for job in &jobs {
            let queued = job.core().is_pending() && job.is_submitted();
            if job.core().is_running() || queued {
                job.abort();
                aborted += 1;
            }
        }
        tracing::info!(aborted, waiting = handles.len(), "Shutting down job manager");

        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(grace_secs = grace.as_secs(), "Jobs still running after shutdown grace period");
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if let Some(sweep) = lock(&self.sweep).take() {
            sweep.abort();
        }
    }
}

fn spawn_idle_sweep(
    runtime: &tokio::runtime::Handle,
    state: Arc<Mutex<ManagerState>>,
    every: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = lock(&state).prune(every, max_idle);
            if evicted > 0 {
                tracing::info!(evicted, "Pruned idle jobs");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::worker::job::JobDefinition;
    use crate::worker::task::{Task, TaskBody, TaskContext};

    /// Task that runs until released by the test.
    struct Gate(Arc<Notify>);

    #[async_trait]
    impl TaskBody for Gate {
        async fn execute(&self, task: &TaskContext<'_>) -> anyhow::Result<()> {
            tokio::select! {
                _ = self.0.notified() => {}
                _ = async {
                    while task.is_running() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                } => {}
            }
            Ok(())
        }
    }

    struct Gated(Arc<Notify>);

    #[async_trait]
    impl JobDefinition for Gated {
        async fn build_tasks(&self, job: &Job) -> anyhow::Result<()> {
            job.add_task(Arc::new(Task::new(Gate(Arc::clone(&self.0)))))?;
            Ok(())
        }
    }

    struct Quick;

    #[async_trait]
    impl JobDefinition for Quick {
        async fn build_tasks(&self, _job: &Job) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Invalid;

    #[async_trait]
    impl JobDefinition for Invalid {
        async fn validate_input(&self, _job: &Job) -> anyhow::Result<()> {
            anyhow::bail!("missing survey")
        }

        async fn build_tasks(&self, _job: &Job) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn manager() -> JobManager {
        let config = JobManagerConfig {
            max_job_idle: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(3600),
            ..JobManagerConfig::default()
        };
        JobManager::new(config, Arc::new(WorkerRegistry::new()))
    }

    async fn wait_running(job: &Job) {
        let mut status = job.core().subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s != WorkerStatus::Pending),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn sync_start_runs_to_completion() {
        let manager = manager();
        let job = Arc::new(Job::new(Quick));

        manager.start_with(Arc::clone(&job), false).await.unwrap();

        assert!(job.core().is_completed());
        assert!(manager.job(job.core().id()).is_some());
    }

    #[tokio::test]
    async fn async_start_returns_before_job_ends() {
        let manager = manager();
        let gate = Arc::new(Notify::new());
        let job = Arc::new(Job::new(Gated(Arc::clone(&gate))));

        manager.start(Arc::clone(&job)).await.unwrap();
        wait_running(&job).await;
        assert!(job.core().is_running());

        gate.notify_one();
        assert!(job.wait_for(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn failed_initialization_is_not_run() {
        let manager = manager();
        let job = Arc::new(Job::new(Invalid));

        manager.start_with(Arc::clone(&job), false).await.unwrap();

        assert!(job.core().is_failed());
        assert!(job.core().start_time().is_none());
        assert_eq!(job.core().error_message().as_deref(), Some("missing survey"));
    }

    #[tokio::test]
    async fn lock_conflict_then_success() {
        let manager = manager();
        let gate = Arc::new(Notify::new());
        let first = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        let second = Arc::new(Job::new(Quick));
        let third = Arc::new(Job::new(Quick));

        manager
            .start_locked(Arc::clone(&first), "groupX")
            .await
            .unwrap();
        wait_running(&first).await;
        assert_eq!(
            manager.locking_job("groupX").unwrap().core().id(),
            first.core().id()
        );

        let err = manager
            .start_locked(Arc::clone(&second), "groupX")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::LockConflict { holder, .. } if holder == first.core().id()));
        assert!(second.core().is_pending());

        gate.notify_one();
        assert!(first.wait_for(Duration::from_secs(5)).await);

        // The lock is released by the spawned runner right after the job ends.
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.locking_job("groupX").is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        manager
            .start_locked_with(Arc::clone(&third), "groupX", false)
            .await
            .unwrap();
        assert!(third.core().is_completed());
        assert!(manager.locking_job("groupX").is_none());
    }

    #[tokio::test]
    async fn different_lock_groups_run_together() {
        let manager = manager();
        let gate = Arc::new(Notify::new());
        let a = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        let b = Arc::new(Job::new(Gated(Arc::clone(&gate))));

        manager.start_locked(Arc::clone(&a), "one").await.unwrap();
        manager.start_locked(Arc::clone(&b), "two").await.unwrap();
        wait_running(&a).await;
        wait_running(&b).await;
        assert_eq!(manager.summary().locks, 2);

        manager.shutdown().await;
        assert!(a.core().is_aborted());
        assert!(b.core().is_aborted());
    }

    #[tokio::test]
    async fn transient_jobs_are_not_tracked() {
        let manager = manager();
        let job = Arc::new(Job::new(Quick));

        manager
            .start_with_options(
                Arc::clone(&job),
                StartOptions::new().run_async(false).transient(true),
            )
            .await
            .unwrap();

        assert!(job.core().is_completed());
        assert!(manager.job(job.core().id()).is_none());
        assert_eq!(manager.summary().total, 0);
    }

    #[tokio::test]
    async fn prunes_jobs_idle_past_limit() {
        let manager = manager();
        let done = Arc::new(Job::new(Quick));
        manager.start_with(Arc::clone(&done), false).await.unwrap();

        let gate = Arc::new(Notify::new());
        let busy = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        manager.start(Arc::clone(&busy)).await.unwrap();
        wait_running(&busy).await;

        assert_eq!(manager.prune_idle_jobs(Duration::from_secs(6)), 0);
        assert_eq!(manager.prune_idle_jobs(Duration::from_secs(6)), 1);
        assert!(manager.job(done.core().id()).is_none());
        assert!(manager.job(busy.core().id()).is_some());

        gate.notify_one();
        assert!(busy.wait_for(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn summary_counts_by_status() {
        let manager = manager();
        manager
            .start_with(Arc::new(Job::new(Quick)), false)
            .await
            .unwrap();
        manager
            .start_with(Arc::new(Job::new(Invalid)), false)
            .await
            .unwrap();

        let summary = manager.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.locks, 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["completed"], 1);
    }

    #[tokio::test]
    async fn bounded_pool_runs_one_job_at_a_time() {
        let config = JobManagerConfig {
            max_concurrent_jobs: Some(1),
            ..JobManagerConfig::default()
        };
        let manager = JobManager::new(config, Arc::new(WorkerRegistry::new()));
        let gate = Arc::new(Notify::new());
        let first = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        let second = Arc::new(Job::new(Quick));

        manager.start(Arc::clone(&first)).await.unwrap();
        wait_running(&first).await;
        manager.start(Arc::clone(&second)).await.unwrap();

        assert!(!second.wait_for(Duration::from_millis(50)).await);
        assert!(second.core().is_pending());

        gate.notify_one();
        assert!(first.wait_for(Duration::from_secs(5)).await);
        assert!(second.wait_for(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn unknown_job_kind() {
        let manager = manager();
        assert!(matches!(
            manager.create_job("nope"),
            Err(WorkerError::UnknownKind { .. })
        ));
    }

    fn single_slot_manager() -> JobManager {
        let config = JobManagerConfig {
            max_concurrent_jobs: Some(1),
            ..JobManagerConfig::default()
        };
        JobManager::new(config, Arc::new(WorkerRegistry::new()))
    }

    #[tokio::test]
    async fn queued_job_cannot_be_started_again() {
        let manager = single_slot_manager();
        let blocker_gate = Arc::new(Notify::new());
        let blocker = Arc::new(Job::new(Gated(Arc::clone(&blocker_gate))));
        manager.start(Arc::clone(&blocker)).await.unwrap();
        wait_running(&blocker).await;

        let gate = Arc::new(Notify::new());
        let queued = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        manager.start_locked(Arc::clone(&queued), "g").await.unwrap();
        assert!(queued.core().is_pending());
        assert!(queued.is_submitted());

        let err = manager
            .start_locked_with(Arc::clone(&queued), "g", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::AlreadyStarted {
                status: WorkerStatus::Pending,
                ..
            }
        ));

        blocker_gate.notify_one();
        wait_running(&queued).await;
        assert!(queued.core().is_running());

        // The lock group stays with the running job.
        assert_eq!(
            manager.locking_job("g").unwrap().core().id(),
            queued.core().id()
        );
        let other = Arc::new(Job::new(Quick));
        assert!(matches!(
            manager.start_locked(Arc::clone(&other), "g").await,
            Err(WorkerError::LockConflict { .. })
        ));

        gate.notify_one();
        assert!(queued.wait_for(Duration::from_secs(5)).await);
        assert!(matches!(
            manager.start(Arc::clone(&queued)).await,
            Err(WorkerError::AlreadyStarted {
                status: WorkerStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn lock_conflict_leaves_job_startable() {
        let manager = manager();
        let gate = Arc::new(Notify::new());
        let holder = Arc::new(Job::new(Gated(Arc::clone(&gate))));
        manager.start_locked(Arc::clone(&holder), "g").await.unwrap();

        let waiting = Arc::new(Job::new(Quick));
        assert!(manager.start_locked(Arc::clone(&waiting), "g").await.is_err());
        assert!(!waiting.is_submitted());

        manager.start_with(Arc::clone(&waiting), false).await.unwrap();
        assert!(waiting.core().is_completed());

        gate.notify_one();
        assert!(holder.wait_for(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn shutdown_aborts_queued_jobs() {
        let manager = single_slot_manager();
        let gate = Arc::new(Notify::new());
        let running = Arc::new(Job::new(Gated(gate)));
        manager.start(Arc::clone(&running)).await.unwrap();
        wait_running(&running).await;

        let queued = Arc::new(Job::new(Quick));
        manager.start(Arc::clone(&queued)).await.unwrap();
        assert!(queued.core().is_pending());

        manager.shutdown().await;

        assert!(running.core().is_aborted());
        assert!(queued.core().is_aborted());
        assert!(queued.core().start_time().is_none());
    }

    /// Task that only ends when notified, ignoring the clock.
    struct Held(Arc<Notify>);

    #[async_trait]
    impl TaskBody for Held {
        async fn execute(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
            self.0.notified().await;
            Ok(())
        }
    }

    struct HeldJob(Arc<Notify>);

    #[async_trait]
    impl JobDefinition for HeldJob {
        async fn build_tasks(&self, job: &Job) -> anyhow::Result<()> {
            job.add_task(Arc::new(Task::new(Held(Arc::clone(&self.0)))))?;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sweep_evicts_ended_jobs_only() {
        let config = JobManagerConfig {
            max_job_idle: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            ..JobManagerConfig::default()
        };
        let manager = JobManager::new(config, Arc::new(WorkerRegistry::new()));

        let done = Arc::new(Job::new(Quick));
        manager.start_with(Arc::clone(&done), false).await.unwrap();

        let gate = Arc::new(Notify::new());
        let locked = Arc::new(Job::new(HeldJob(Arc::clone(&gate))));
        manager.start_locked(Arc::clone(&locked), "g").await.unwrap();
        wait_running(&locked).await;

        // Sweeps at 60s and 120s: idle for 120s, not past the limit yet.
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(manager.job(done.core().id()).is_some());

        // Sweep at 180s evicts it.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(manager.job(done.core().id()).is_none());
        assert!(manager.job(locked.core().id()).is_some());
        assert!(manager.locking_job("g").is_some());

        gate.notify_one();
        assert!(locked.wait_for(Duration::from_secs(5)).await);
    }
}
