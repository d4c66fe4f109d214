//! TaskStore port - 再起動をまたいでタスクを残す永続ストア
//!
//! # 実装
//! - **FileTaskStore**: 1 行 1 タスクのテキストファイル（本番用）
//! - **InMemoryTaskStore**: テスト用

use async_trait::async_trait;

use crate::domain::Task;
use crate::error::SpoolError;

/// TaskStore holds the tasks that were still undelivered at shutdown.
///
/// # 設計原則
/// - Lifecycle だけが触る（起動時の load/clear、停止時の append）
/// - batcher のループと同時にアクセスされることはないのでロック不要
/// - 順序を保存する
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Read every persisted task in stored order, skipping empty entries.
    ///
    /// An absent store is not an error: it reads as empty.
    async fn load(&self) -> Result<Vec<Task>, SpoolError>;

    /// Append tasks after whatever is already stored.
    async fn append(&self, tasks: &[Task]) -> Result<(), SpoolError>;

    /// Replace the stored contents with `tasks`.
    async fn overwrite(&self, tasks: &[Task]) -> Result<(), SpoolError>;

    /// Remove everything. Clearing an absent store succeeds.
    async fn clear(&self) -> Result<(), SpoolError>;
}
