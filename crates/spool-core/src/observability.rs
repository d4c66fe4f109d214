use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a running buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks in the batch currently being dispatched.
    pub in_flight: usize,
    pub produced: u64,
    /// Tasks reloaded from the spool file at startup.
    pub recovered: u64,
    pub batches_dispatched: u64,
    pub tasks_dispatched: u64,
    /// One per (batch, consumer) pair that failed.
    pub consumer_failures: u64,
}

/// Monotonic counters shared between the producer side and the batcher loop.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    produced: AtomicU64,
    recovered: AtomicU64,
    batches_dispatched: AtomicU64,
    tasks_dispatched: AtomicU64,
    consumer_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self, n: usize) {
        self.recovered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, tasks: usize, failures: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.tasks_dispatched.fetch_add(tasks as u64, Ordering::Relaxed);
        self.consumer_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued: usize, in_flight: usize) -> BufferStats {
        BufferStats {
            queued,
            in_flight,
            produced: self.produced.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            consumer_failures: self.consumer_failures.load(Ordering::Relaxed),
        }
    }
}
