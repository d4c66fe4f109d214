//! Lifecycle - 起動時のリカバリと停止時の永続化
//!
//! # 起動
//! 1. TaskStore から前回の残りを読み込み、キューの先頭に積む
//! 2. TaskStore を空にする
//! 3. batcher ループを起動
//!
//! # 停止
//! 1. ループに停止を依頼し、キューを close（以降の produce は Closed）
//! 2. 配送中のバッチが終わるのを grace まで待つ（過ぎたら abort）
//! 3. キューの残り → in-flight バッチの順に TaskStore へ追記
//!
//! TaskStore に触るのはループ起動前とループ停止後だけ。

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::batcher::{Batcher, BatcherHandle, InFlightSlot};
use super::builder::BufferBuilder;
use super::producer::Producer;
use super::registry::ConsumerRegistry;
use crate::config::BufferConfig;
use crate::domain::Task;
use crate::error::SpoolError;
use crate::observability::{BufferStats, Counters};
use crate::ports::{Clock, TaskStore};
use crate::queue::TaskQueue;

/// A configured, not yet started buffer.
pub struct QueueBuffer {
    pub(crate) config: BufferConfig,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) consumers: Arc<ConsumerRegistry>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) counters: Arc<Counters>,
}

/// What shutdown did with the tasks it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks taken from the queue.
    pub from_queue: usize,
    /// Tasks taken from the batch that was being assembled or dispatched.
    pub from_in_flight: usize,
    /// `false` when the loop had to be aborted or ended abnormally.
    pub clean_stop: bool,
    /// Set when the store write failed; the tasks above are then lost.
    pub persist_error: Option<String>,
}

impl ShutdownReport {
    pub fn persisted(&self) -> usize {
        if self.persist_error.is_some() {
            0
        } else {
            self.from_queue + self.from_in_flight
        }
    }
}

impl QueueBuffer {
    pub fn builder() -> BufferBuilder {
        BufferBuilder::new()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Recover spooled tasks, then start the batcher loop.
    ///
    /// A store that cannot be read is logged and skipped: the buffer starts empty.
    pub async fn start(self) -> RunningBuffer {
        let recovered = self.recover().await;
        info!(
            recovered,
            consumers = ?self.consumers.names(),
            capacity = ?self.queue.capacity(),
            "starting queue buffer"
        );

        let in_flight = Arc::new(InFlightSlot::default());
        let batcher = Batcher {
            queue: Arc::clone(&self.queue),
            consumers: Arc::clone(&self.consumers),
            in_flight: Arc::clone(&in_flight),
            counters: Arc::clone(&self.counters),
            clock: Arc::clone(&self.clock),
            max_elements: self.config.max_batch_elements,
            timeout: self.config.batch_timeout(),
        }
        .spawn();

        RunningBuffer {
            producer: Producer::new(Arc::clone(&self.queue), Arc::clone(&self.counters)),
            queue: self.queue,
            in_flight,
            store: self.store,
            counters: self.counters,
            batcher,
            config: self.config,
        }
    }

    async fn recover(&self) -> usize {
        let tasks = match self.store.load().await {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "failed to read spooled tasks, starting with an empty queue");
                return 0;
            }
        };

        let n = tasks.len();
        self.queue.restore(tasks).await;
        self.counters.record_recovered(n);

        if let Err(err) = self.store.clear().await {
            // 削除できなくても中身を空にできれば二重投入は防げる
            warn!(error = %err, "failed to remove spool, truncating instead");
            if let Err(err) = self.store.overwrite(&[]).await {
                error!(
                    error = %err,
                    recovered = n,
                    "failed to truncate spool, recovered tasks may be replayed again"
                );
            }
        }
        n
    }
}

/// A buffer whose batcher loop is running.
pub struct RunningBuffer {
    producer: Producer,
    queue: Arc<TaskQueue>,
    in_flight: Arc<InFlightSlot>,
    store: Arc<dyn TaskStore>,
    counters: Arc<Counters>,
    batcher: BatcherHandle,
    config: BufferConfig,
}

impl RunningBuffer {
    pub fn producer(&self) -> Producer {
        self.producer.clone()
    }

    pub async fn produce(&self, task: impl Into<Task>) -> Result<(), SpoolError> {
        self.producer.produce(task).await
    }

    pub async fn try_produce(&self, task: impl Into<Task>) -> Result<(), SpoolError> {
        self.producer.try_produce(task).await
    }

    pub async fn stats(&self) -> BufferStats {
        let queued = self.queue.len().await;
        let in_flight = self.in_flight.len().await;
        self.counters.snapshot(queued, in_flight)
    }

    /// Stop the loop and spool every undelivered task.
    ///
    /// Queue contents are written first, then the in-flight batch. No
    /// deduplication: if the loop had to be aborted mid-dispatch, the consumer call
    /// in progress is cancelled with it, but consumers earlier in registration
    /// order may already have seen tasks that are spooled here too.
    pub async fn shutdown(self) -> ShutdownReport {
        info!("shutting down queue buffer");

        // stop を先に立てておかないと、close 後の空キューでループが空回りする
        self.batcher.request_stop();
        self.queue.close().await;
        let clean_stop = self.batcher.join(self.config.shutdown_grace()).await;

        let mut pending = self.queue.take_all().await;
        let from_queue = pending.len();
        let in_flight = self.in_flight.take().await;
        let from_in_flight = in_flight.as_ref().map_or(0, |b| b.len());
        if let Some(batch) = in_flight {
            pending.extend(batch.iter().cloned());
        }

        info!(
            queued = from_queue,
            in_flight = from_in_flight,
            clean_stop,
            "spooling undelivered tasks"
        );

        let persist_error = if pending.is_empty() {
            None
        } else {
            match self.store.append(&pending).await {
                Ok(()) => None,
                Err(err) => {
                    error!(error = %err, lost = pending.len(), "failed to spool undelivered tasks");
                    Some(err.to_string())
                }
            }
        };

        ShutdownReport {
            from_queue,
            from_in_flight,
            clean_stop,
            persist_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Batch;
    use crate::error::ConsumerError;
    use crate::impls::{FileTaskStore, InMemoryTaskStore};
    use crate::ports::BatchConsumer;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Collect {
        name: &'static str,
        batches: Mutex<Vec<Vec<Task>>>,
    }

    impl Collect {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                batches: Mutex::new(Vec::new()),
            })
        }

        async fn delivered(&self) -> Vec<Task> {
            self.batches.lock().await.iter().flatten().cloned().collect()
        }
    }

    #[async_trait]
    impl BatchConsumer for Collect {
        fn name(&self) -> &str {
            self.name
        }

        async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
            self.batches.lock().await.push(batch.tasks().to_vec());
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl BatchConsumer for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn consume(&self, _batch: &Batch) -> Result<(), ConsumerError> {
            Err(std::io::Error::other("sink down").into())
        }
    }

    /// 読み書きが常に失敗するストア
    struct BrokenStore;

    #[async_trait]
    impl TaskStore for BrokenStore {
        async fn load(&self) -> Result<Vec<Task>, SpoolError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn append(&self, _tasks: &[Task]) -> Result<(), SpoolError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn overwrite(&self, _tasks: &[Task]) -> Result<(), SpoolError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn clear(&self) -> Result<(), SpoolError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    fn config(max: usize, timeout_secs: u64) -> BufferConfig {
        BufferConfig {
            max_batch_elements: max,
            batch_timeout_secs: timeout_secs,
            shutdown_grace_secs: 5,
            ..BufferConfig::default()
        }
    }

    fn tasks(items: &[&str]) -> Vec<Task> {
        items.iter().map(|s| Task::from(*s)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn failing_consumer_does_not_starve_healthy_one() {
        let healthy = Collect::new("healthy");
        let running = QueueBuffer::builder()
            .config(config(2, 1))
            .store(InMemoryTaskStore::new())
            .register(AlwaysFails)
            .unwrap()
            .register_shared(healthy.clone())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await;

        for t in ["a", "b", "c", "d", "e"] {
            running.produce(t).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(healthy.delivered().await, tasks(&["a", "b", "c", "d", "e"]));
        let stats = running.stats().await;
        assert_eq!(stats.produced, 5);
        assert_eq!(stats.tasks_dispatched, 5);
        assert_eq!(stats.consumer_failures, stats.batches_dispatched);

        let report = running.shutdown().await;
        assert!(report.clean_stop);
        assert_eq!(report.persisted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_tasks_are_delivered_before_new_ones() {
        let store = Arc::new(InMemoryTaskStore::with_tasks(tasks(&["old1", "old2"])));
        let sink = Collect::new("sink");
        let running = QueueBuffer::builder()
            .config(config(10, 1))
            .shared_store(store.clone())
            .register_shared(sink.clone())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await;

        assert!(store.contents().await.is_empty());
        running.produce("new").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(sink.delivered().await, tasks(&["old1", "old2", "new"]));
        assert_eq!(running.stats().await.recovered, 2);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_spools_queue_then_in_flight() {
        let store = Arc::new(InMemoryTaskStore::new());
        let running = QueueBuffer::builder()
            .config(config(100, 3600))
            .shared_store(store.clone())
            .register_shared(Collect::new("sink"))
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await;

        // ループが drain 中に拾った分は in-flight、その後の分はキューに残る
        running.produce("first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = running.shutdown().await;

        assert!(report.clean_stop);
        assert_eq!(report.from_queue + report.from_in_flight, 1);
        assert_eq!(store.contents().await, tasks(&["first"]));
    }

    /// sealed_at を記録するだけの consumer
    struct SealTimes {
        seen: Mutex<Vec<chrono::DateTime<chrono::Utc>>>,
    }

    #[async_trait]
    impl BatchConsumer for SealTimes {
        fn name(&self) -> &str {
            "seal-times"
        }

        async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
            self.seen.lock().await.push(batch.sealed_at());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_stamped_by_the_configured_clock() {
        use chrono::TimeZone;

        let at = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let sink = Arc::new(SealTimes {
            seen: Mutex::new(Vec::new()),
        });
        let running = QueueBuffer::builder()
            .config(config(1, 1))
            .store(InMemoryTaskStore::new())
            .clock(crate::ports::FixedClock::new(at))
            .register_shared(sink.clone())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await;

        running.produce("a").await.unwrap();
        running.produce("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*sink.seen.lock().await, vec![at, at]);
        running.shutdown().await;
    }

    #[tokio::test]
    async fn produce_after_shutdown_is_rejected() {
        let running = QueueBuffer::builder()
            .config(config(10, 1))
            .store(InMemoryTaskStore::new())
            .build()
            .unwrap()
            .start()
            .await;
        let producer = running.producer();

        running.shutdown().await;

        assert!(matches!(producer.produce("late").await, Err(SpoolError::Closed)));
    }

    #[tokio::test]
    async fn unreadable_store_starts_empty_and_reports_lost_tasks() {
        let running = QueueBuffer::builder()
            .config(config(10, 3600))
            .store(BrokenStore)
            .build()
            .unwrap()
            .start()
            .await;
        assert_eq!(running.stats().await.recovered, 0);

        running.produce("doomed").await.unwrap();
        let report = running.shutdown().await;

        assert!(report.persist_error.is_some());
        assert_eq!(report.persisted(), 0);
    }

    #[tokio::test]
    async fn spool_file_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            persistence_dir: Some(dir.path().to_path_buf()),
            ..config(100, 3600)
        };

        // 1 回目: consumer なし、長い timeout なので全部キューか in-flight に残る
        let running = QueueBuffer::builder()
            .config(cfg.clone())
            .build()
            .unwrap()
            .start()
            .await;
        for t in ["a", "b", "c"] {
            running.produce(t).await.unwrap();
        }
        let report = running.shutdown().await;
        assert_eq!(report.persisted(), 3);
        // produce は一度も yield しないので、ループが拾う前に停止している
        assert_eq!(report.from_queue, 3);

        let spool = FileTaskStore::new(cfg.persistence_file());
        assert_eq!(spool.load().await.unwrap(), tasks(&["a", "b", "c"]));

        // 2 回目: 読み込まれて配送され、ファイルは消える
        let sink = Collect::new("sink");
        let running = QueueBuffer::builder()
            .config(BufferConfig {
                batch_timeout_secs: 1,
                ..cfg.clone()
            })
            .register_shared(sink.clone())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await;
        assert!(!cfg.persistence_file().exists());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(sink.delivered().await, tasks(&["a", "b", "c"]));

        let report = running.shutdown().await;
        assert_eq!(report.persisted(), 0);
        assert!(!cfg.persistence_file().exists());
    }

    #[tokio::test]
    async fn corrupt_spool_line_does_not_block_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BufferConfig {
            persistence_dir: Some(dir.path().to_path_buf()),
            ..config(100, 3600)
        };
        tokio::fs::write(cfg.persistence_file(), b"a\n\xff\nb\n")
            .await
            .unwrap();

        let running = QueueBuffer::builder()
            .config(cfg.clone())
            .build()
            .unwrap()
            .start()
            .await;
        assert_eq!(running.stats().await.recovered, 2);
        assert!(!cfg.persistence_file().exists());

        running.produce("c").await.unwrap();
        let report = running.shutdown().await;
        assert_eq!(report.persisted(), 3);

        let spooled = tokio::fs::read(cfg.persistence_file()).await.unwrap();
        assert_eq!(spooled, b"a\nb\nc\n");
    }
}
