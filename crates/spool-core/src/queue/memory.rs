//! In-memory FIFO of pending tasks.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::Task;
use crate::error::SpoolError;

/// Queue state behind the single lock.
struct QueueState {
    items: VecDeque<Task>,
    closed: bool,
}

impl QueueState {
    fn has_room(&self, capacity: Option<usize>) -> bool {
        capacity.is_none_or(|cap| self.items.len() < cap)
    }
}

/// Thread-safe FIFO shared by producers and the batcher loop.
///
/// Design:
/// - One lock guards both the items and the closed flag.
/// - `not_empty` wakes the (single) reader, `not_full` wakes producers parked on a
///   bounded queue.
/// - Waiters register interest with `Notified::enable` before checking state, so a
///   notify between the check and the await is never lost.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
    capacity: Option<usize>,
}

impl TaskQueue {
    /// `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append to the tail, waiting while a bounded queue is full.
    pub async fn push(&self, task: Task) -> Result<(), SpoolError> {
        loop {
            let not_full = self.not_full.notified();
            tokio::pin!(not_full);
            not_full.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(SpoolError::Closed);
                }
                if state.has_room(self.capacity) {
                    state.items.push_back(task);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            // 空きが出るか close されるまで待つ
            not_full.await;
        }
    }

    /// Append to the tail, failing with `QueueFull` instead of waiting.
    pub async fn try_push(&self, task: Task) -> Result<(), SpoolError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SpoolError::Closed);
        }
        if let Some(cap) = self.capacity
            && state.items.len() >= cap
        {
            return Err(SpoolError::QueueFull(cap));
        }
        state.items.push_back(task);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Load recovered tasks ahead of anything produced later.
    ///
    /// Capacity is not enforced here: recovered tasks were already accepted once,
    /// so they always fit. Producers simply park until the backlog drains.
    pub async fn restore(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        state.items.extend(tasks);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Non-blocking bulk removal of up to `max` tasks, appended to `buf` in order.
    pub async fn drain_into(&self, buf: &mut Vec<Task>, max: usize) -> usize {
        let mut state = self.state.lock().await;
        let n = max.min(state.items.len());
        buf.extend(state.items.drain(..n));
        drop(state);

        if n > 0 {
            self.not_full.notify_waiters();
        }
        n
    }

    /// Wait for the next task until `deadline`.
    ///
    /// Returns `None` when the deadline passes with nothing queued, or right away
    /// when the queue is closed and empty.
    pub async fn pop_until(&self, deadline: Instant) -> Option<Task> {
        loop {
            let not_empty = self.not_empty.notified();
            tokio::pin!(not_empty);
            not_empty.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(task) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, not_empty).await.is_err() {
                // deadline と同時に入ったものは拾っておく
                return self.try_pop().await;
            }
        }
    }

    async fn try_pop(&self) -> Option<Task> {
        let task = self.state.lock().await.items.pop_front();
        if task.is_some() {
            self.not_full.notify_waiters();
        }
        task
    }

    /// Remove and return everything, in order. Used at shutdown.
    pub async fn take_all(&self) -> Vec<Task> {
        let mut state = self.state.lock().await;
        let tasks: Vec<Task> = state.items.drain(..).collect();
        drop(state);

        if !tasks.is_empty() {
            self.not_full.notify_waiters();
        }
        tasks
    }

    /// Reject further pushes and wake everyone parked on the queue.
    ///
    /// Tasks already queued stay put until `take_all` or a drain removes them.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(None)
    }
}
