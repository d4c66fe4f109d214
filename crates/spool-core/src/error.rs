use thiserror::Error;

/// Error returned by a consumer callback.
///
/// Boxed so consumers can `?` whatever their own I/O layer returns.
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("task queue is full (capacity={0})")]
    QueueFull(usize),

    #[error("task queue is closed")]
    Closed,

    #[error("duplicate consumer name={0}")]
    DuplicateConsumer(String),

    #[error("task store i/o failed: {0}")]
    Store(#[from] std::io::Error),
}

/// BuildError はバッファ構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid value for '{key}': {reason}")]
    InvalidConfig { key: &'static str, reason: String },
}
