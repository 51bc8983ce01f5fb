//! Item-oriented workers.
//!
//! A [`Task`] wraps a [`TaskBody`] supplied by the application and tracks how
//! many items were processed or skipped out of a total counted right before
//! execution starts.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::progress::{Progress, ProgressListener};
use crate::worker::base::WorkerCore;
use crate::worker::state::WorkerStatus;
use crate::worker::worker::{Worker, short_type_name};

/// Value of `total_items` until it has been counted.
pub const UNKNOWN_TOTAL: i64 = -1;

/// Processed / skipped / total item counters.
#[derive(Debug)]
pub struct ItemCounters {
    total: AtomicI64,
    processed: AtomicU64,
    skipped: AtomicU64,
}

impl ItemCounters {
    pub fn new() -> Self {
        Self {
            total: AtomicI64::new(UNKNOWN_TOTAL),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Acquire)
    }

    /// `total - (processed + skipped)`; negative while the total is unknown.
    pub fn remaining(&self) -> i64 {
        self.total() - self.done() as i64
    }

    fn done(&self) -> u64 {
        self.processed() + self.skipped()
    }

    /// Progress percentage for a task in `status`.
    ///
    /// `ceil((processed + skipped) * 100 / total)` while running. Neither the
    /// counters nor the percentage are clamped, so a task that processes more
    /// items than it counted reports over 100 until it completes.
    pub fn percent(&self, status: WorkerStatus) -> u32 {
        match status {
            WorkerStatus::Completed => 100,
            WorkerStatus::Pending => 0,
            _ => {
                let total = self.total();
                if total <= 0 {
                    return 0;
                }
                let percent = (self.done() * 100).div_ceil(total as u64);
                u32::try_from(percent).unwrap_or(u32::MAX)
            }
        }
    }
}

impl Default for ItemCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle given to [`TaskBody`] hooks: the task's lifecycle state and its
/// counters.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    core: &'a WorkerCore,
    items: &'a ItemCounters,
    listener: Option<&'a Arc<dyn ProgressListener>>,
}

impl<'a> TaskContext<'a> {
    pub fn core(&self) -> &'a WorkerCore {
        self.core
    }

    /// `false` once the task has been aborted; execute loops should stop then.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn is_aborted(&self) -> bool {
        self.core.is_aborted()
    }

    pub fn increment_processed_items(&self) -> u64 {
        self.items.processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn increment_skipped_items(&self) -> u64 {
        self.items.skipped.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_processed_items(&self, processed: u64) {
        self.items.processed.store(processed, Ordering::Release);
    }

    /// Override the counted total, e.g. when it is only discovered while
    /// executing.
    pub fn set_total_items(&self, total: i64) {
        self.items.total.store(total, Ordering::Release);
    }

    pub fn total_items(&self) -> i64 {
        self.items.total()
    }

    pub fn processed_items(&self) -> u64 {
        self.items.processed()
    }

    pub fn skipped_items(&self) -> u64 {
        self.items.skipped()
    }

    pub fn progress(&self) -> Progress {
        build_progress(self.core, self.items)
    }

    /// Push the current progress to the task's progress listener, if any.
    pub fn report_progress(&self) {
        if let Some(listener) = self.listener {
            listener.progress_made(&self.progress());
        }
    }
}

/// Application-supplied behavior of a [`Task`].
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn validate_input(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_internal_variables(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn initialize_internal_variables(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Number of items this task will go through, counted right before
    /// execution. [`UNKNOWN_TOTAL`] keeps the progress at 0 until completion.
    async fn count_total_items(&self, _task: &TaskContext<'_>) -> anyhow::Result<i64> {
        Ok(UNKNOWN_TOTAL)
    }

    async fn before_execute(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, task: &TaskContext<'_>) -> anyhow::Result<()>;

    async fn after_execute(&self, _task: &TaskContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_completed(&self, _task: &TaskContext<'_>) {}

    fn on_failed(&self, _task: &TaskContext<'_>) {}

    fn on_aborted(&self, _task: &TaskContext<'_>) {}

    fn on_end(&self, _task: &TaskContext<'_>) {}

    fn release(&self) {}
}

/// A worker tracking item-count based progress. Not reusable.
pub struct Task<B: TaskBody> {
    core: WorkerCore,
    items: ItemCounters,
    progress_listener: OnceLock<Arc<dyn ProgressListener>>,
    body: B,
}

impl<B: TaskBody> Task<B> {
    pub fn new(body: B) -> Self {
        Self {
            core: WorkerCore::new(),
            items: ItemCounters::new(),
            progress_listener: OnceLock::new(),
            body,
        }
    }

    /// Set the weight of this task inside a job.
    pub fn with_weight(self, weight: u32) -> Self {
        self.core.set_weight(weight);
        self
    }

    /// Receive [`Progress`] whenever the body calls
    /// [`TaskContext::report_progress`].
    pub fn with_progress_listener(self, listener: Arc<dyn ProgressListener>) -> Self {
        let _ = self.progress_listener.set(listener);
        self
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn context(&self) -> TaskContext<'_> {
        TaskContext {
            core: &self.core,
            items: &self.items,
            listener: self.progress_listener.get(),
        }
    }

    pub fn total_items(&self) -> i64 {
        self.items.total()
    }

    pub fn processed_items(&self) -> u64 {
        self.items.processed()
    }

    pub fn skipped_items(&self) -> u64 {
        self.items.skipped()
    }

    pub fn remaining_items(&self) -> i64 {
        self.items.remaining()
    }

    /// Items done out of total, with elapsed time and a remaining-time
    /// estimate extrapolated from the rate so far.
    pub fn progress(&self) -> Progress {
        build_progress(&self.core, &self.items)
    }
}

fn build_progress(core: &WorkerCore, items: &ItemCounters) -> Progress {
    let done = items.done();
    let total = items.total();
    let mut progress = Progress::new(done as i64, total);

    if let Some(elapsed) = core.duration() {
        progress = progress.with_elapsed(elapsed);
        if core.is_running() && done > 0 && total > done as i64 {
            let left = (total - done as i64) as u64;
            let per_item = elapsed.as_secs_f64() / done as f64;
            progress = progress.with_remaining(Duration::from_secs_f64(per_item * left as f64));
        }
    }
    progress
}

#[async_trait]
impl<B: TaskBody> Worker for Task<B> {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn name(&self) -> &str {
        self.body.name()
    }

    async fn validate_input(&self) -> anyhow::Result<()> {
        self.body.validate_input(&self.context()).await
    }

    async fn create_internal_variables(&self) -> anyhow::Result<()> {
        self.body.create_internal_variables(&self.context()).await
    }

    async fn initialize_internal_variables(&self) -> anyhow::Result<()> {
        self.body.initialize_internal_variables(&self.context()).await
    }

    async fn before_execute(&self) -> anyhow::Result<()> {
        let ctx = self.context();
        self.body.before_execute(&ctx).await?;
        let total = self.body.count_total_items(&ctx).await?;
        self.items.total.store(total, Ordering::Release);
        Ok(())
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.body.execute(&self.context()).await
    }

    async fn after_execute(&self) -> anyhow::Result<()> {
        self.body.after_execute(&self.context()).await
    }

    fn on_completed(&self) {
        self.body.on_completed(&self.context());
    }

    fn on_failed(&self) {
        self.body.on_failed(&self.context());
    }

    fn on_aborted(&self) {
        self.body.on_aborted(&self.context());
    }

    fn on_end(&self) {
        self.body.on_end(&self.context());
    }

    fn release(&self) {
        self.body.release();
    }

    fn progress_percent(&self) -> u32 {
        self.items.percent(self.core.status())
    }
}
