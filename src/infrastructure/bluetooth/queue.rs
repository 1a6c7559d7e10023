//! GATT Operation Queue
//!
//! The radio stack accepts a single outstanding GATT operation. Everything
//! that touches the write characteristic goes through a [`TransportQueue`],
//! which runs operations one at a time in enqueue order.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// The queue worker stopped before the operation could run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl From<QueueClosed> for super::error::TransportError {
    fn from(_: QueueClosed) -> Self {
        Self::NotConnected
    }
}

type Job = BoxFuture<'static, ()>;

// Saturating so a job finishing during `close` cannot wrap the counter
fn release(pending: &AtomicUsize) {
    let _ = pending.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.saturating_sub(1))
    });
}

/// Strict FIFO of async operations with a single worker
pub struct TransportQueue {
    jobs: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl TransportQueue {
    /// Start an empty queue. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            trace!("Transport queue worker finished");
        });

        Self {
            jobs,
            pending: Arc::new(AtomicUsize::new(0)),
            worker,
        }
    }

    /// Append an operation. It starts only after every earlier operation has
    /// resolved, whatever their outcome.
    ///
    /// The returned future carries this operation's result only. It does not
    /// need to be polled for the operation to run; dropping it just discards
    /// the result.
    pub fn enqueue<F, Fut, T, E>(&self, operation: F) -> impl Future<Output = Result<T, E>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<QueueClosed> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let pending = self.pending.clone();
        let depth = pending.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > 1 {
            debug!("Transport queue backlog: {} operations", depth);
        }

        let counter = pending.clone();
        let job: Job = Box::pin(async move {
            let result = operation().await;
            release(&counter);
            let _ = done_tx.send(result);
        });

        if self.jobs.send(job).is_err() {
            release(&pending);
        }

        async move {
            match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(QueueClosed.into()),
            }
        }
    }

    /// Operations enqueued and not yet resolved, including the running one
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop the worker. Operations that have not resolved yet fail with
    /// [`QueueClosed`]; later enqueues fail immediately.
    pub fn close(&self) {
        if !self.worker.is_finished() {
            debug!("Closing transport queue with {} pending", self.pending());
        }
        self.worker.abort();
        self.pending.store(0, Ordering::SeqCst);
    }
}

impl Default for TransportQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransportQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(usize),
        Closed,
    }

    impl From<QueueClosed> for TestError {
        fn from(_: QueueClosed) -> Self {
            Self::Closed
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mark {
        Start(usize),
        End(usize),
    }

    #[tokio::test(start_paused = true)]
    async fn operations_run_one_at_a_time_in_order() {
        let queue = TransportQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        // Uneven latencies so a concurrent runner would finish out of order
        let latencies = [30u64, 5, 50, 1, 20, 0, 45, 10];

        let results: Vec<_> = latencies
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                let log = log.clone();
                queue.enqueue(move || async move {
                    log.lock().unwrap().push(Mark::Start(i));
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    log.lock().unwrap().push(Mark::End(i));
                    Ok::<usize, TestError>(i)
                })
            })
            .collect();

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.await, Ok(i));
        }

        let expected: Vec<Mark> = (0..latencies.len())
            .flat_map(|i| [Mark::Start(i), Mark::End(i)])
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_block_later_operations() {
        let queue = TransportQueue::new();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let results: Vec<_> = (0..5usize)
            .map(|i| {
                let ran = ran.clone();
                queue.enqueue(move || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ran.lock().unwrap().push(i);
                    if i == 2 {
                        Err(TestError::Failed(i))
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for result in results {
            outcomes.push(result.await);
        }

        assert_eq!(
            outcomes,
            vec![Ok(0), Ok(1), Err(TestError::Failed(2)), Ok(3), Ok(4)]
        );
        assert_eq!(*ran.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_run_without_awaiting_results() {
        let queue = TransportQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = ran.clone();
            drop(queue.enqueue(move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestError>(())
            }));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_queues_instead_of_dropping() {
        let queue = TransportQueue::new();
        let results: Vec<_> = (0..100usize)
            .map(|i| {
                queue.enqueue(move || async move {
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    Ok::<usize, TestError>(i)
                })
            })
            .collect();
        assert_eq!(queue.pending(), 100);

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.await, Ok(i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_unfinished_operations() {
        let queue = TransportQueue::new();
        let slow = queue.enqueue(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), TestError>(())
        });
        let queued = queue.enqueue(|| async { Ok::<(), TestError>(()) });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(queue.pending(), 2);
        queue.close();
        assert_eq!(queue.pending(), 0);

        assert_eq!(slow.await, Err(TestError::Closed));
        assert_eq!(queued.await, Err(TestError::Closed));

        let late = queue.enqueue(|| async { Ok::<(), TestError>(()) });
        assert_eq!(late.await, Err(TestError::Closed));
        assert_eq!(queue.pending(), 0);
    }
}
