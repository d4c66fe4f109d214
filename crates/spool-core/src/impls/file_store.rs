//! FileTaskStore - 1 行 1 タスクのテキストファイル
//!
//! エスケープはしない。改行を含むタスクは読み戻すと複数のタスクに分かれる。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::BufferConfig;
use crate::domain::Task;
use crate::error::SpoolError;
use crate::ports::TaskStore;

/// Spools tasks to a plain text file, one task per line.
pub struct FileTaskStore {
    path: PathBuf,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.persistence_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<(), SpoolError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn encode(&self, tasks: &[Task]) -> String {
        let mut out = String::with_capacity(tasks.iter().map(|t| t.as_str().len() + 1).sum());
        for task in tasks {
            if !task.is_single_line() {
                warn!(
                    path = %self.path.display(),
                    task = %task,
                    "task contains a line break and will be split on reload"
                );
            }
            out.push_str(task.as_str());
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load(&self) -> Result<Vec<Task>, SpoolError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        for (lineno, line) in bytes.split(|b| *b == b'\n').enumerate() {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            // 壊れた行で全体を失わないよう、その行だけ捨てる
            match std::str::from_utf8(line) {
                Ok(text) => tasks.push(Task::from(text)),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %err,
                    "skipping undecodable spool line"
                ),
            }
        }

        debug!(path = %self.path.display(), tasks = tasks.len(), "spool loaded");
        Ok(tasks)
    }

    async fn append(&self, tasks: &[Task]) -> Result<(), SpoolError> {
        if tasks.is_empty() {
            return Ok(());
        }
        self.ensure_parent().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(self.encode(tasks).as_bytes()).await?;
        file.sync_all().await?;

        debug!(path = %self.path.display(), tasks = tasks.len(), "spool appended");
        Ok(())
    }

    async fn overwrite(&self, tasks: &[Task]) -> Result<(), SpoolError> {
        self.ensure_parent().await?;

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(self.encode(tasks).as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SpoolError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
