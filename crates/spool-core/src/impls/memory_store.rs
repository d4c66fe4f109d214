//! InMemoryTaskStore - テスト・開発用の TaskStore

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::Task;
use crate::error::SpoolError;
use crate::ports::TaskStore;

/// Keeps "persisted" tasks in memory. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前回の停止で残ったものがある状態から始める
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub async fn contents(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn load(&self) -> Result<Vec<Task>, SpoolError> {
        Ok(self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|t| !t.as_str().is_empty())
            .cloned()
            .collect())
    }

    async fn append(&self, tasks: &[Task]) -> Result<(), SpoolError> {
        self.tasks.lock().await.extend_from_slice(tasks);
        Ok(())
    }

    async fn overwrite(&self, tasks: &[Task]) -> Result<(), SpoolError> {
        *self.tasks.lock().await = tasks.to_vec();
        Ok(())
    }

    async fn clear(&self) -> Result<(), SpoolError> {
        self.tasks.lock().await.clear();
        Ok(())
    }
}
