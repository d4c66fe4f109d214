//! Batcher - drain → dispatch を繰り返すバックグラウンドループ
//!
//! # フロー
//! 1. drain_batch_until でバッチを集める（stop シグナルと競合させる）
//! 2. 空でなければ in-flight スロットに公開
//! 3. ConsumerRegistry で全 consumer に配送
//! 4. スロットを空にして 1 に戻る（待ち時間なし）
//!
//! キューを読むのはこのループだけで、同時に処理中のバッチは常に 1 つ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::drain::{DrainEnd, drain_batch_until};
use super::registry::ConsumerRegistry;
use crate::domain::Batch;
use crate::observability::Counters;
use crate::ports::Clock;
use crate::queue::TaskQueue;

/// Single-slot holder for the batch the loop is currently dispatching.
///
/// The loop publishes before calling consumers and clears after the last one
/// returns; shutdown takes whatever is left.
#[derive(Default)]
pub(crate) struct InFlightSlot {
    slot: Mutex<Option<Arc<Batch>>>,
}

impl InFlightSlot {
    pub(crate) async fn publish(&self, batch: Arc<Batch>) {
        *self.slot.lock().await = Some(batch);
    }

    pub(crate) async fn clear(&self) {
        self.slot.lock().await.take();
    }

    pub(crate) async fn take(&self) -> Option<Arc<Batch>> {
        self.slot.lock().await.take()
    }

    pub(crate) async fn len(&self) -> usize {
        self.slot.lock().await.as_ref().map_or(0, |b| b.len())
    }
}

pub(crate) struct Batcher {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) consumers: Arc<ConsumerRegistry>,
    pub(crate) in_flight: Arc<InFlightSlot>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) max_elements: usize,
    pub(crate) timeout: Duration,
}

/// Handle to the spawned loop.
/// - `request_stop()` でループに停止を依頼（配送中の consumer は中断しない）
/// - `join()` で終了を待つ
pub(crate) struct BatcherHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Batcher {
    pub(crate) fn spawn(self) -> BatcherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stop_rx));
        BatcherHandle { stop_tx, join }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!(
            max_elements = self.max_elements,
            timeout_ms = self.timeout.as_millis() as u64,
            consumers = self.consumers.len(),
            "batcher loop started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let mut tasks = Vec::new();
            let end = drain_batch_until(
                &self.queue,
                &mut tasks,
                self.max_elements,
                self.timeout,
                stopped(&mut stop_rx),
            )
            .await;
            debug!(drained = tasks.len(), end = ?end, "drain finished");

            if tasks.is_empty() {
                if end == DrainEnd::Stopped {
                    break;
                }
                // closed かつ空なら pop が即座に返るので、ここで抜けないと空回りする
                if self.queue.is_closed().await {
                    break;
                }
                continue;
            }

            let batch = Arc::new(Batch::new(tasks, self.clock.now()));
            self.in_flight.publish(Arc::clone(&batch)).await;

            if end == DrainEnd::Stopped {
                // 配送せずにスロットへ残し、shutdown 側で永続化させる
                info!(
                    batch_id = %batch.id(),
                    tasks = batch.len(),
                    "stop requested mid-drain, leaving batch undelivered"
                );
                break;
            }

            let report = self.consumers.dispatch(&batch).await;
            self.counters
                .record_dispatch(batch.len(), report.failed.len());
            self.in_flight.clear().await;

            debug!(
                batch_id = %batch.id(),
                tasks = batch.len(),
                delivered = report.delivered,
                failed = report.failed.len(),
                "batch dispatched"
            );
        }

        info!("batcher loop stopped");
    }
}

/// Resolves once stop is requested. A dropped sender counts as a stop request.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl BatcherHandle {
    pub(crate) fn request_stop(&self) {
        // ループが既に終わっていれば receiver はいないので無視
        let _ = self.stop_tx.send(true);
    }

    /// Wait up to `grace` for the loop to exit, aborting it afterwards.
    ///
    /// Returns `true` when the loop stopped on its own.
    pub(crate) async fn join(self, grace: Duration) -> bool {
        let mut join = self.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(error = %err, "batcher loop ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "batcher loop still dispatching after grace period, aborting"
                );
                join.abort();
                let _ = join.await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use crate::error::ConsumerError;
    use crate::ports::{BatchConsumer, SystemClock};
    use async_trait::async_trait;

    struct Collect {
        batches: Mutex<Vec<Vec<Task>>>,
    }

    #[async_trait]
    impl BatchConsumer for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
            self.batches.lock().await.push(batch.tasks().to_vec());
            Ok(())
        }
    }

    /// consume が呼ばれたら永遠に戻らない
    struct Stuck;

    #[async_trait]
    impl BatchConsumer for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn consume(&self, _batch: &Batch) -> Result<(), ConsumerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Harness {
        queue: Arc<TaskQueue>,
        in_flight: Arc<InFlightSlot>,
        counters: Arc<Counters>,
    }

    fn spawn_with(
        consumer: Arc<dyn BatchConsumer>,
        max_elements: usize,
        timeout: Duration,
    ) -> (Harness, BatcherHandle) {
        let mut registry = ConsumerRegistry::new();
        registry.register(consumer).unwrap();

        let harness = Harness {
            queue: Arc::new(TaskQueue::new(None)),
            in_flight: Arc::new(InFlightSlot::default()),
            counters: Arc::new(Counters::default()),
        };
        let handle = Batcher {
            queue: harness.queue.clone(),
            consumers: Arc::new(registry),
            in_flight: harness.in_flight.clone(),
            counters: harness.counters.clone(),
            clock: Arc::new(SystemClock),
            max_elements,
            timeout,
        }
        .spawn();
        (harness, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_everything_in_order_without_duplicates() {
        let collect = Arc::new(Collect {
            batches: Mutex::new(Vec::new()),
        });
        let (h, handle) = spawn_with(collect.clone(), 4, Duration::from_millis(100));

        let sent: Vec<Task> = (0..10).map(|i| Task::new(format!("t{i}"))).collect();
        for t in &sent {
            h.queue.push(t.clone()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(1)).await);

        let batches = collect.batches.lock().await;
        assert!(batches.iter().all(|b| b.len() <= 4));
        let delivered: Vec<Task> = batches.iter().flatten().cloned().collect();
        assert_eq!(delivered, sent);
        assert_eq!(h.counters.snapshot(0, 0).tasks_dispatched, 10);
        assert_eq!(h.in_flight.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_an_idle_drain_promptly() {
        let collect = Arc::new(Collect {
            batches: Mutex::new(Vec::new()),
        });
        let (_h, handle) = spawn_with(collect, 10, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = tokio::time::Instant::now();
        handle.request_stop();
        assert!(handle.join(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_at_stop_stays_in_flight() {
        let collect = Arc::new(Collect {
            batches: Mutex::new(Vec::new()),
        });
        let (h, handle) = spawn_with(collect.clone(), 10, Duration::from_secs(3600));

        h.queue.push("pending".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(1)).await);

        assert!(collect.batches.lock().await.is_empty());
        let left = h.in_flight.take().await.unwrap();
        assert_eq!(left.tasks(), &[Task::from("pending")]);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_consumer_is_aborted_after_grace_and_batch_kept() {
        let (h, handle) = spawn_with(Arc::new(Stuck), 1, Duration::from_millis(10));

        h.queue.push("blocked".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.in_flight.len().await, 1);

        handle.request_stop();
        assert!(!handle.join(Duration::from_secs(2)).await);

        let left = h.in_flight.take().await.unwrap();
        assert_eq!(left.tasks(), &[Task::from("blocked")]);
    }
}
