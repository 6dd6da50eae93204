//! Serializing request queue.
//!
//! Work items are executed one at a time, in submission order, by a single
//! background worker. Each item runs under the timeout in effect when it is
//! dequeued; an item that overruns is dropped and its caller receives
//! [`QueueError::Timeout`], then the worker moves on. An item that panics
//! is reported as [`QueueError::Panicked`] and does not stop the worker.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queued request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queued request failed unexpectedly")]
    Panicked,

    #[error("Request queue is closed")]
    Closed,
}

type Job = Box<dyn FnOnce(Duration) -> BoxFuture<'static, ()> + Send>;

#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<Job>,
    timeout_ms: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("timeout", &self.timeout())
            .field("pending", &self.pending())
            .finish()
    }
}

impl RequestQueue {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let timeout_ms = Arc::new(AtomicU64::new(duration_ms(timeout)));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_timeout = timeout_ms.clone();
        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let timeout = Duration::from_millis(worker_timeout.load(Ordering::SeqCst));
                job(timeout).await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("Request queue worker stopped");
        });

        Self {
            sender,
            timeout_ms,
            pending,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    /// Applies to items dequeued from now on.
    pub fn set_timeout(&self, timeout: Duration) {
        debug!("Queue timeout set to {:?}", timeout);
        self.timeout_ms.store(duration_ms(timeout), Ordering::SeqCst);
    }

    /// Items submitted but not yet finished, including the running one.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Submit `work` and wait for its result.
    ///
    /// `work` is only invoked once every earlier item has finished or timed
    /// out.
    pub async fn enqueue<F, Fut, T>(&self, work: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |timeout: Duration| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let mut task = tokio::spawn(async move { work().await });
                let result = match tokio::time::timeout(timeout, &mut task).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(join_err)) => {
                        error!("Queued request failed: {join_err}");
                        Err(QueueError::Panicked)
                    }
                    Err(_) => {
                        warn!("Queued request abandoned after {:?}", timeout);
                        task.abort();
                        // Resolves once the abandoned work has been dropped
                        let _ = task.await;
                        Err(QueueError::Timeout(timeout))
                    }
                };
                // The caller may have given up waiting
                let _ = tx.send(result);
            })
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        debug!("Request queued ({} pending)", self.pending());

        rx.await.map_err(|_| QueueError::Closed)?
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_work_result() {
        let queue = RequestQueue::new(Duration::from_secs(5));
        let value = queue.enqueue(|| async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_and_queue_continues() {
        let queue = RequestQueue::new(Duration::from_millis(100));
        let stuck = queue.enqueue(|| futures::future::pending::<()>());
        let next = queue.enqueue(|| async { "next" });
        let (stuck, next) = tokio::join!(stuck, next);
        assert_eq!(stuck, Err(QueueError::Timeout(Duration::from_millis(100))));
        assert_eq!(next, Ok("next"));
    }

    #[tokio::test]
    async fn test_panicking_item_does_not_stop_worker() {
        let queue = RequestQueue::new(Duration::from_secs(5));
        let failed = queue
            .enqueue(|| async {
                let lengths: Vec<usize> = Vec::new();
                lengths[3]
            })
            .await;
        assert_eq!(failed, Err(QueueError::Panicked));

        let next = queue.enqueue(|| async { "next" }).await;
        assert_eq!(next, Ok("next"));
    }

    #[tokio::test]
    async fn test_set_timeout() {
        let queue = RequestQueue::new(Duration::from_secs(60));
        queue.set_timeout(Duration::from_secs(5));
        assert_eq!(queue.timeout(), Duration::from_secs(5));
    }
}
