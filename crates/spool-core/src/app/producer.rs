use std::sync::Arc;

use tracing::debug;

use crate::domain::Task;
use crate::error::SpoolError;
use crate::observability::Counters;
use crate::queue::TaskQueue;

/// Cloneable, producer-facing entry point of a running buffer.
///
/// Safe to call from any number of tasks at once.
#[derive(Clone)]
pub struct Producer {
    queue: Arc<TaskQueue>,
    counters: Arc<Counters>,
}

impl Producer {
    pub(crate) fn new(queue: Arc<TaskQueue>, counters: Arc<Counters>) -> Self {
        Self { queue, counters }
    }

    /// Enqueue a task, waiting for room if the queue is bounded and full.
    ///
    /// Fails only with `Closed` once shutdown has begun.
    pub async fn produce(&self, task: impl Into<Task>) -> Result<(), SpoolError> {
        let task = task.into();
        debug!(task = %task, "task produced");
        self.queue.push(task).await?;
        self.counters.record_produced();
        Ok(())
    }

    /// Enqueue a task without waiting; a full bounded queue yields `QueueFull`.
    pub async fn try_produce(&self, task: impl Into<Task>) -> Result<(), SpoolError> {
        let task = task.into();
        debug!(task = %task, "task produced");
        self.queue.try_push(task).await?;
        self.counters.record_produced();
        Ok(())
    }
}
