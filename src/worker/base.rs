//! State shared by every worker: identity, status, timing, failure and
//! listeners.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use super::listener::{ListenerId, StatusChangeEvent, StatusChangeListener};
use super::state::WorkerStatus;
use super::worker::Worker;

/// Lock a std mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Timing {
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Failure {
    message: Option<String>,
    cause: Option<Arc<anyhow::Error>>,
}

type ListenerList = Vec<(ListenerId, Arc<dyn StatusChangeListener>)>;

/// Lifecycle state embedded in every [`Worker`](super::Worker).
///
/// The status lives in a `watch` channel so that any number of tasks can wait
/// for the worker to end while a single task drives it.
pub struct WorkerCore {
    id: Uuid,
    status: watch::Sender<WorkerStatus>,
    timing: Mutex<Timing>,
    failure: Mutex<Failure>,
    weight: AtomicU32,
    listeners: RwLock<ListenerList>,
    next_listener_id: AtomicU64,
}

impl WorkerCore {
    pub fn new() -> Self {
        let (status, _rx) = watch::channel(WorkerStatus::Pending);
        Self {
            id: Uuid::new_v4(),
            status,
            timing: Mutex::new(Timing::default()),
            failure: Mutex::new(Failure::default()),
            weight: AtomicU32::new(1),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == WorkerStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status() == WorkerStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status() == WorkerStatus::Failed
    }

    pub fn is_aborted(&self) -> bool {
        self.status() == WorkerStatus::Aborted
    }

    /// Completed, failed or aborted.
    pub fn is_ended(&self) -> bool {
        self.status().is_ended()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.timing).start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.timing).end_time
    }

    /// `None` while pending, time elapsed so far while running, total run time
    /// once ended.
    pub fn duration(&self) -> Option<Duration> {
        let status = self.status();
        let timing = lock(&self.timing);
        let start = timing.start_time?;
        let end = match status {
            WorkerStatus::Pending => return None,
            WorkerStatus::Running => Utc::now(),
            _ => timing.end_time.unwrap_or_else(Utc::now),
        };
        Some((end - start).to_std().unwrap_or_default())
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.failure).message.clone()
    }

    /// The error that made this worker fail, shared with any parent job that
    /// re-raised it.
    pub fn last_failure(&self) -> Option<Arc<anyhow::Error>> {
        lock(&self.failure).cause.clone()
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Relative cost of this worker inside a job; zero is treated as one.
    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add_status_change_listener(
        &self,
        listener: Arc<dyn StatusChangeListener>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_status_change_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Receiver that observes every status change of this worker.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Wait until this worker ends or `timeout` elapses. Returns `true` only
    /// if the worker ended in [`WorkerStatus::Completed`].
    pub async fn wait_for(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let _ = tokio::time::timeout(timeout, rx.wait_for(|status| status.is_ended())).await;
        self.is_completed()
    }

    /// Apply `to` if the state machine allows it. Returns the previous status
    /// when the transition happened.
    pub(crate) fn transition(&self, to: WorkerStatus) -> Option<WorkerStatus> {
        let mut from = None;
        self.status.send_if_modified(|status| {
            if status.can_transition_to(to) {
                from = Some(*status);
                *status = to;
                true
            } else {
                false
            }
        });
        from
    }

    /// Move to `Failed`, recording `message` and `cause`. Nothing is recorded
    /// when the worker already ended.
    pub(crate) fn transition_to_failed(
        &self,
        message: Option<String>,
        cause: Option<Arc<anyhow::Error>>,
    ) -> Option<WorkerStatus> {
        let mut failure = lock(&self.failure);
        let from = self.transition(WorkerStatus::Failed)?;
        failure.message = message;
        failure.cause = cause;
        Some(from)
    }

    pub(crate) fn record_start(&self) {
        lock(&self.timing).start_time = Some(Utc::now());
    }

    pub(crate) fn record_end(&self) {
        lock(&self.timing).end_time = Some(Utc::now());
    }

    /// Tell every listener that `source`, the worker owning this core, moved
    /// from `from` to `to`.
    pub(crate) fn notify_listeners(
        &self,
        source: &dyn Worker,
        from: WorkerStatus,
        to: WorkerStatus,
    ) {
        // Snapshot so listeners may (un)subscribe while being notified.
        let listeners: Vec<Arc<dyn StatusChangeListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let event = StatusChangeEvent { source, from, to };
        for listener in listeners {
            listener.status_changed(&event);
        }
    }
}

impl Default for WorkerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("weight", &self.weight())
            .finish()
    }
}
