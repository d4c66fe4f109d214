use std::sync::Arc;

use tokio::task::AbortHandle;
use tracing::{debug, error};

use crate::domain::Batch;
use crate::error::SpoolError;
use crate::ports::BatchConsumer;

/// Ordered set of consumers every batch is fanned out to.
///
/// Design:
/// - Built during initialization (mutable).
/// - Used by the batcher loop (immutable, behind an `Arc`).
/// Registration order is dispatch order.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Vec<Arc<dyn BatchConsumer>>,
}

/// Outcome of handing one batch to every consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Names of the consumers that returned an error or panicked.
    pub failed: Vec<String>,
}

/// Aborts the wrapped task when dropped. A no-op once the task has finished.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
        }
    }

    /// Register a consumer. Names must be unique.
    pub fn register(&mut self, consumer: Arc<dyn BatchConsumer>) -> Result<(), SpoolError> {
        let name = consumer.name();
        if self.consumers.iter().any(|c| c.name() == name) {
            return Err(SpoolError::DuplicateConsumer(name.to_string()));
        }
        self.consumers.push(consumer);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.consumers.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Hand `batch` to each consumer in turn.
    ///
    /// Each callback runs on its own task and is awaited before the next one starts,
    /// so a panicking consumer is contained the same way an erroring one is.
    pub async fn dispatch(&self, batch: &Arc<Batch>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for consumer in &self.consumers {
            let name = consumer.name().to_string();
            let join = tokio::spawn({
                let consumer = Arc::clone(consumer);
                let batch = Arc::clone(batch);
                async move { consumer.consume(&batch).await }
            });
            // dispatch ごと abort されたら consumer も止める
            let _cancel = AbortOnDrop(join.abort_handle());

            match join.await {
                Ok(Ok(())) => {
                    debug!(consumer = %name, batch_id = %batch.id(), "batch consumed");
                    report.delivered += 1;
                }
                Ok(Err(err)) => {
                    error!(
                        consumer = %name,
                        batch_id = %batch.id(),
                        tasks = batch.len(),
                        error = %err,
                        "consumer failed"
                    );
                    report.failed.push(name);
                }
                Err(join_err) => {
                    error!(
                        consumer = %name,
                        batch_id = %batch.id(),
                        tasks = batch.len(),
                        error = %join_err,
                        "consumer panicked"
                    );
                    report.failed.push(name);
                }
            }
        }

        report
    }
}
