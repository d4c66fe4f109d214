//! Batch - 1 回の drain で組み立てられたタスク列

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::Task;

/// Identifier attached to every batch for log correlation.
///
/// ULID so ids sort by the time the batch was sealed.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(Ulid);

impl BatchId {
    /// timestamp 部分は sealed_at から、残りは乱数で埋める
    pub fn generate(at: DateTime<Utc>) -> Self {
        let timestamp_ms = at.timestamp_millis().max(0) as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// An ordered snapshot of tasks removed from the queue by one drain cycle.
///
/// Handed to every consumer as a read-only view, then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    sealed_at: DateTime<Utc>,
    tasks: Vec<Task>,
}

impl Batch {
    pub fn new(tasks: Vec<Task>, sealed_at: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::generate(sealed_at),
            sealed_at,
            tasks,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
