//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileTaskStore**: 1 行 1 タスクのスプールファイル（本番用）
//! - **InMemoryTaskStore**: テスト用のストア
//! - **LoggingConsumer**: バッチサイズをログに出すだけの consumer

pub mod file_store;
pub mod logging_consumer;
pub mod memory_store;

pub use self::file_store::FileTaskStore;
pub use self::logging_consumer::LoggingConsumer;
pub use self::memory_store::InMemoryTaskStore;
