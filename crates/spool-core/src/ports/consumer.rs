//! BatchConsumer port - バッチを受け取る外部ハンドラ

use async_trait::async_trait;

use crate::domain::Batch;
use crate::error::ConsumerError;

/// A handler invoked with every batch the buffer assembles.
///
/// Callbacks are fire-and-forget from the buffer's side: an error is logged and
/// counted, never retried, and never stops the other consumers from seeing the
/// same batch. Anything the consumer needs to make durable is its own business.
///
/// Consumers run one after another on the batcher's loop, so a slow `consume`
/// holds up the next drain.
///
/// # 使用例
/// ```ignore
/// struct Audit;
///
/// #[async_trait]
/// impl BatchConsumer for Audit {
///     fn name(&self) -> &str { "audit" }
///
///     async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
///         for task in batch.iter() {
///             write_row(task.as_str()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchConsumer: Send + Sync {
    /// Identity used for registration and in logs. Must be unique per buffer.
    fn name(&self) -> &str;

    async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError>;
}
