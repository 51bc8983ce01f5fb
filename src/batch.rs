//! Buffer items and hand them to an executor in fixed-size batches.

use std::mem;

/// Receives each full (or final partial) batch.
pub trait BatchExecutor<T> {
    fn execute(&mut self, batch: Vec<T>) -> anyhow::Result<()>;
}

impl<T, F> BatchExecutor<T> for F
where
    F: FnMut(Vec<T>) -> anyhow::Result<()>,
{
    fn execute(&mut self, batch: Vec<T>) -> anyhow::Result<()> {
        self(batch)
    }
}

/// Queues items and flushes them to a [`BatchExecutor`] every `batch_size`
/// items. Call [`close`](Self::close) (or [`flush`](Self::flush)) once done
/// so the last partial batch is not lost.
#[must_use = "items are only handed over in full batches until the processor is closed"]
pub struct BatchProcessor<T, E: BatchExecutor<T>> {
    batch_size: usize,
    executor: E,
    queue: Vec<T>,
}

impl<T, E: BatchExecutor<T>> BatchProcessor<T, E> {
    /// A batch size of zero is treated as one.
    pub fn new(batch_size: usize, executor: E) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            executor,
            queue: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Items queued but not yet flushed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn process(&mut self, item: T) -> anyhow::Result<()> {
        self.queue.push(item);
        if self.queue.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn process_all<I>(&mut self, items: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.process(item)?;
        }
        Ok(())
    }

    /// Hand the queued items to the executor. The queue is emptied even if
    /// the executor fails.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let batch = mem::replace(&mut self.queue, Vec::with_capacity(self.batch_size));
        tracing::trace!(items = batch.len(), "Flushing batch");
        self.executor.execute(batch)
    }

    /// Flush the remainder and give back the executor.
    pub fn close(mut self) -> anyhow::Result<E> {
        self.flush()?;
        Ok(self.executor)
    }
}
