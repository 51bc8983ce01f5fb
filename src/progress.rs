//! Progress values and listeners.
//!
//! Workers can be polled for a percentage at any time; pipelines that chain
//! several steps use [`ProcessProgressListener`] to fold each step's progress
//! into one overall figure pushed to an outer [`ProgressListener`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::worker::base::lock;

/// Items processed out of a total, with optional timing estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed_items: i64,
    /// Non-positive when unknown.
    pub total_items: i64,
    pub elapsed_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
}

impl Progress {
    pub fn new(processed_items: i64, total_items: i64) -> Self {
        Self {
            processed_items,
            total_items,
            elapsed_ms: None,
            remaining_ms: None,
        }
    }

    /// A finished unit of progress.
    pub fn complete() -> Self {
        Self::new(1, 1)
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn with_remaining(mut self, remaining: Duration) -> Self {
        self.remaining_ms = Some(remaining.as_millis() as u64);
        self
    }

    /// `floor(processed / total * 100)`, or `None` when the total is unknown.
    pub fn completion_percent(&self) -> Option<u32> {
        if self.total_items <= 0 {
            return None;
        }
        let processed = self.processed_items.max(0) as u128;
        Some((processed * 100 / self.total_items as u128) as u32)
    }
}

/// Receives progress updates.
pub trait ProgressListener: Send + Sync {
    fn progress_made(&self, progress: &Progress);
}

impl<F> ProgressListener for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn progress_made(&self, progress: &Progress) {
        self(progress)
    }
}

/// Listener that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressListener;

impl ProgressListener for NullProgressListener {
    fn progress_made(&self, _progress: &Progress) {}
}

#[derive(Debug)]
struct Steps {
    current: usize,
    per_step: Vec<Option<Progress>>,
}

/// Aggregates the progress of a fixed number of sequential steps.
///
/// The overall progress is the sum of every step's completion percent out of
/// `steps * 100`. Completed steps count as fully done.
#[derive(Debug)]
pub struct ProcessProgressListener {
    steps: Mutex<Steps>,
}

impl ProcessProgressListener {
    pub fn new(total_steps: usize) -> Self {
        Self {
            steps: Mutex::new(Steps {
                current: 0,
                per_step: vec![None; total_steps],
            }),
        }
    }

    pub fn total_steps(&self) -> usize {
        lock(&self.steps).per_step.len()
    }

    pub fn current_step(&self) -> usize {
        lock(&self.steps).current
    }

    /// Record progress of the current step.
    pub fn step_progress_made(&self, progress: Progress) {
        let mut steps = lock(&self.steps);
        let current = steps.current;
        match steps.per_step.get_mut(current) {
            Some(slot) => *slot = Some(progress),
            None => warn!(
                step = current,
                total_steps = steps.per_step.len(),
                "Progress reported after the last step completed"
            ),
        }
    }

    /// Mark the current step done and move to the next one.
    pub fn step_completed(&self) {
        let mut steps = lock(&self.steps);
        let current = steps.current;
        if let Some(slot) = steps.per_step.get_mut(current) {
            *slot = Some(Progress::complete());
            steps.current += 1;
        }
    }

    pub fn progress(&self) -> Progress {
        let steps = lock(&self.steps);
        let done: i64 = steps
            .per_step
            .iter()
            .flatten()
            .filter_map(|p| p.completion_percent())
            .map(i64::from)
            .sum();
        Progress::new(done, steps.per_step.len() as i64 * 100)
    }
}

/// Listener for one step of a process: records the step's progress and pushes
/// the overall progress to an outer listener.
pub struct ProcessStepProgressListener {
    process: Arc<ProcessProgressListener>,
    outer: Arc<dyn ProgressListener>,
}

impl ProcessStepProgressListener {
    pub fn new(process: Arc<ProcessProgressListener>, outer: Arc<dyn ProgressListener>) -> Self {
        Self { process, outer }
    }
}

impl ProgressListener for ProcessStepProgressListener {
    fn progress_made(&self, progress: &Progress) {
        self.process.step_progress_made(*progress);
        self.outer.progress_made(&self.process.progress());
    }
}
