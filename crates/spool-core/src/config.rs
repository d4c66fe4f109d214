//! Buffer configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BuildError;

/// Fixed file name of the spool file inside `persistence_dir`.
pub const PERSISTENCE_FILE_NAME: &str = "queueTask.txt";

/// Tunables for one buffer.
///
/// The buffer consumes these as plain values; where they come from (TOML, env,
/// hard-coded) is up to the host.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// A batch is dispatched as soon as it holds this many tasks.
    #[serde(default = "default_max_batch_elements")]
    pub max_batch_elements: usize,
    /// A partial batch is dispatched after waiting this long, in seconds.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    /// Upper bound on queued tasks. Unbounded when absent.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Directory holding the spool file. Defaults to the executable's directory.
    #[serde(default)]
    pub persistence_dir: Option<PathBuf>,
    /// How long shutdown waits for an in-progress dispatch before giving up on it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl BufferConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Full path of the spool file.
    pub fn persistence_file(&self) -> PathBuf {
        self.persistence_dir
            .clone()
            .unwrap_or_else(default_persistence_dir)
            .join(PERSISTENCE_FILE_NAME)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_batch_elements == 0 {
            return Err(BuildError::InvalidConfig {
                key: "max_batch_elements",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_timeout_secs == 0 {
            // 0 だと空のキューに対してループが待たずに回り続ける
            return Err(BuildError::InvalidConfig {
                key: "batch_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(BuildError::InvalidConfig {
                key: "queue_capacity",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_batch_elements: default_max_batch_elements(),
            batch_timeout_secs: default_batch_timeout_secs(),
            queue_capacity: None,
            persistence_dir: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Directory of the running executable, or the working directory if that is unknown.
fn default_persistence_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

// ── Default value functions ─────────────────────────────────────────

fn default_max_batch_elements() -> usize {
    1000
}
fn default_batch_timeout_secs() -> u64 {
    10
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
