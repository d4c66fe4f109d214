//! Drain - size-or-timeout でバッチを集める
//!
//! # フロー
//! 1. deadline = now + timeout
//! 2. キューにあるものを非ブロッキングでまとめて取る（最大 max - 収集済み）
//! 3. まだ足りなければ、deadline までの残り時間だけ次の 1 件を待つ
//!    - 届いたら 2 に戻る
//!    - 届かなければ集まった分を返す
//! 4. max に達したら即座に返す
//!
//! まとめ取りでロックと wake のコストを償却しつつ、最後の 1 枠だけを待つので、
//! データがある状態で timeout いっぱい待たされることはない。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::Task;
use crate::queue::TaskQueue;

/// Why a drain returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    /// `max_elements` tasks were collected.
    Full,
    /// The deadline passed (or the queue was closed) before the batch filled up.
    TimedOut,
    /// The stop signal fired while waiting.
    Stopped,
}

/// Collect up to `max_elements` tasks, waiting no longer than `timeout`.
///
/// Returns early once the batch is full. May return an empty batch.
pub async fn drain_batch(queue: &TaskQueue, max_elements: usize, timeout: Duration) -> Vec<Task> {
    let mut buf = Vec::with_capacity(max_elements.min(1024));
    drain_batch_until(
        queue,
        &mut buf,
        max_elements,
        timeout,
        std::future::pending::<()>(),
    )
    .await;
    buf
}

/// [`drain_batch`] with a stop signal.
///
/// Tasks are appended to `buf` as they are removed from the queue, so whatever was
/// collected before `stop` resolved is still in `buf` when this returns
/// [`DrainEnd::Stopped`]. Nothing removed from the queue is ever dropped.
pub async fn drain_batch_until<F>(
    queue: &TaskQueue,
    buf: &mut Vec<Task>,
    max_elements: usize,
    timeout: Duration,
    stop: F,
) -> DrainEnd
where
    F: Future<Output = ()>,
{
    let deadline = deadline_after(timeout);
    tokio::pin!(stop);

    let mut added = 0;
    while added < max_elements {
        added += queue.drain_into(buf, max_elements - added).await;
        if added >= max_elements {
            break;
        }

        // pop_until は pop した直後に await を挟まず返るので、stop 側が勝って
        // future が drop されてもタスクは失われない
        let next = tokio::select! {
            biased;
            () = &mut stop => return DrainEnd::Stopped,
            next = queue.pop_until(deadline) => next,
        };

        match next {
            Some(task) => {
                buf.push(task);
                added += 1;
            }
            None => return DrainEnd::TimedOut,
        }
    }
    DrainEnd::Full
}

/// `now + timeout`, saturating to a far-future instant instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

// tokio の timer が扱える範囲に収まる値（約 30 年）
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
