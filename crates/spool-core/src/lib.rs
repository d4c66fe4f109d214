//! spool-core
//!
//! In-process task buffer: producers enqueue string tasks, a background loop
//! delivers them to consumers in batches (size or timeout, whichever first), and
//! undelivered tasks are spooled to disk at shutdown and replayed at startup.
//!
//! # モジュール構成
//! - **domain**: Task, Batch
//! - **ports**: TaskStore, BatchConsumer, Clock
//! - **queue**: TaskQueue（bounded / unbounded FIFO）
//! - **app**: drain, batcher ループ, consumer 配送, builder, lifecycle
//! - **impls**: FileTaskStore, InMemoryTaskStore, LoggingConsumer

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{BufferBuilder, Producer, QueueBuffer, RunningBuffer, ShutdownReport};
pub use config::BufferConfig;
pub use domain::{Batch, BatchId, Task};
pub use error::{BuildError, ConsumerError, SpoolError};
pub use observability::BufferStats;
pub use ports::{BatchConsumer, TaskStore};
