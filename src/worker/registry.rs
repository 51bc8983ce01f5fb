//! Registry of worker and job factories, keyed by kind.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::WorkerError;
use crate::worker::job::Job;
use crate::worker::worker::Worker;

type WorkerFactory = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;
type JobFactory = Arc<dyn Fn() -> Job + Send + Sync>;

/// Creates fresh workers and jobs by kind name.
///
/// Workers are not reusable, so the registry stores factories rather than
/// instances.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerFactory>>,
    jobs: RwLock<HashMap<String, JobFactory>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker factory. Registering a kind twice replaces the
    /// previous factory.
    pub fn register_worker<W, F>(&self, kind: impl Into<String>, factory: F)
    where
        W: Worker,
        F: Fn() -> W + Send + Sync + 'static,
    {
        let kind = kind.into();
        let factory: WorkerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Worker>);
        let replaced = self
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.clone(), factory);
        if replaced.is_some() {
            tracing::warn!(kind = %kind, "Replaced worker factory");
        } else {
            tracing::debug!("Registered worker kind: {}", kind);
        }
    }

    /// Register a job factory. Jobs created through the registry can in turn
    /// create their tasks by kind.
    pub fn register_job<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Job + Send + Sync + 'static,
    {
        let kind = kind.into();
        let replaced = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.clone(), Arc::new(factory));
        if replaced.is_some() {
            tracing::warn!(kind = %kind, "Replaced job factory");
        } else {
            tracing::debug!("Registered job kind: {}", kind);
        }
    }

    pub fn create_worker(&self, kind: &str) -> Result<Arc<dyn Worker>, WorkerError> {
        let factory = self
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownKind {
                category: "worker",
                kind: kind.to_string(),
            })?;
        Ok(factory())
    }

    /// Create a job of `kind`. The job is not yet bound to a registry; use
    /// [`create_job_in`](Self::create_job_in) for that.
    pub fn create_job(&self, kind: &str) -> Result<Job, WorkerError> {
        let factory = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownKind {
                category: "job",
                kind: kind.to_string(),
            })?;
        Ok(factory())
    }

    /// Create a job of `kind` that resolves its tasks through `registry`.
    pub fn create_job_in(registry: &Arc<Self>, kind: &str) -> Result<Job, WorkerError> {
        let job = registry.create_job(kind)?;
        job.set_registry(Arc::clone(registry));
        Ok(job)
    }

    pub fn has_worker(&self, kind: &str) -> bool {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    pub fn has_job(&self, kind: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    /// Registered worker kinds, sorted.
    pub fn worker_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    /// Registered job kinds, sorted.
    pub fn job_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.worker_kinds())
            .field("jobs", &self.job_kinds())
            .finish()
    }
}
