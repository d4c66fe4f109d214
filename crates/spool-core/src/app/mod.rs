//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **BufferBuilder**: バッファの構築とワイヤリング
//! - **QueueBuffer / RunningBuffer**: 起動時リカバリと停止時の永続化
//! - **Producer**: produce の入り口
//! - **drain**: size-or-timeout のバッチ収集
//! - **ConsumerRegistry**: consumer への配送

mod batcher;
pub mod builder;
pub mod drain;
pub mod lifecycle;
pub mod producer;
pub mod registry;

pub use self::builder::BufferBuilder;
pub use self::drain::{DrainEnd, drain_batch, drain_batch_until};
pub use self::lifecycle::{QueueBuffer, RunningBuffer, ShutdownReport};
pub use self::producer::Producer;
pub use self::registry::{ConsumerRegistry, DispatchReport};
