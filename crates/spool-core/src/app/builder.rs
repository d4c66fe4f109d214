//! BufferBuilder - バッファの構築とワイヤリング
//!
//! consumer は明示的に登録する（自動スキャンはしない）。
//! 設定値の検証は build() 時に行う（Fail-fast）。

use std::sync::Arc;

use tracing::warn;

use super::lifecycle::QueueBuffer;
use super::registry::ConsumerRegistry;
use crate::config::BufferConfig;
use crate::error::{BuildError, SpoolError};
use crate::impls::FileTaskStore;
use crate::observability::Counters;
use crate::ports::{BatchConsumer, Clock, SystemClock, TaskStore};
use crate::queue::TaskQueue;

/// BufferBuilder は QueueBuffer を構築
///
/// # 使用例
/// ```ignore
/// let buffer = BufferBuilder::new()
///     .config(cfg)
///     .register(AuditConsumer::new())?
///     .build()?;
/// let running = buffer.start().await;
/// ```
///
/// store を指定しなければ `config.persistence_file()` の FileTaskStore を使う。
pub struct BufferBuilder {
    config: BufferConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    consumers: ConsumerRegistry,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self {
            config: BufferConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
            consumers: ConsumerRegistry::new(),
        }
    }

    pub fn config(mut self, config: BufferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: impl TaskStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Consumer を登録（登録順が配送順）
    pub fn register(self, consumer: impl BatchConsumer + 'static) -> Result<Self, SpoolError> {
        self.register_shared(Arc::new(consumer))
    }

    pub fn register_shared(mut self, consumer: Arc<dyn BatchConsumer>) -> Result<Self, SpoolError> {
        self.consumers.register(consumer)?;
        Ok(self)
    }

    pub fn build(self) -> Result<QueueBuffer, BuildError> {
        self.config.validate()?;

        if self.consumers.is_empty() {
            warn!("no consumers registered; batches will be drained and dropped");
        }

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FileTaskStore::from_config(&self.config)),
        };

        Ok(QueueBuffer {
            queue: Arc::new(TaskQueue::new(self.config.queue_capacity)),
            consumers: Arc::new(self.consumers),
            store,
            clock: self.clock,
            counters: Arc::new(Counters::default()),
            config: self.config,
        })
    }
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}
