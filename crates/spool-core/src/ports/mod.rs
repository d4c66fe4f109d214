//! Ports - 抽象化レイヤー
//!
//! バッファのコアが外部に依存する箇所を trait として切り出します。
//! - 永続ストア（TaskStore）
//! - バッチの受け手（BatchConsumer）
//! - 時刻（Clock）

pub mod clock;
pub mod consumer;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::consumer::BatchConsumer;
pub use self::task_store::TaskStore;
