//! Status-change observers.
//!
//! Listeners are called synchronously, in registration order, on whichever
//! thread changes the worker's status. A slow listener stalls that worker, so
//! listeners should hand heavy work off (e.g. to a channel) instead of doing it
//! inline.

use super::state::WorkerStatus;
use super::worker::Worker;

/// Handle returned when registering a listener, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A status transition of one worker.
#[derive(Clone, Copy)]
pub struct StatusChangeEvent<'a> {
    /// The worker whose status changed.
    pub source: &'a dyn Worker,
    /// Previous status.
    pub from: WorkerStatus,
    /// New status.
    pub to: WorkerStatus,
}

impl std::fmt::Debug for StatusChangeEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChangeEvent")
            .field("source", &self.source.name())
            .field("id", &self.source.core().id())
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Observer of worker status changes.
pub trait StatusChangeListener: Send + Sync {
    fn status_changed(&self, event: &StatusChangeEvent<'_>);
}

impl<F> StatusChangeListener for F
where
    F: Fn(&StatusChangeEvent<'_>) + Send + Sync,
{
    fn status_changed(&self, event: &StatusChangeEvent<'_>) {
        self(event)
    }
}
