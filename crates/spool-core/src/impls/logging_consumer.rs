use async_trait::async_trait;
use tracing::info;

use crate::domain::Batch;
use crate::error::ConsumerError;
use crate::ports::BatchConsumer;

/// Logs the size of every batch. Handy as a smoke test for a new deployment.
pub struct LoggingConsumer {
    name: String,
}

impl LoggingConsumer {
    pub fn new() -> Self {
        Self::named("logging")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchConsumer for LoggingConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
        info!(
            consumer = %self.name,
            batch_id = %batch.id(),
            tasks = batch.len(),
            "batch consumed"
        );
        Ok(())
    }
}
