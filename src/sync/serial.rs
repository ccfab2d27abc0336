//! Single-concurrency work queue

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = BoxFuture<'static, ()>;

/// Executes jobs strictly one after another on a dedicated task.
///
/// The worker exits once every handle to the queue is dropped and the
/// backlog is drained. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct SerialQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    pub fn new(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!(queue = name, "Serial queue drained");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue a job without waiting for it. Returns false if the worker is gone.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(job.boxed()).is_ok()
    }

    /// Enqueue a job and wait for its output.
    ///
    /// Returns `None` if the worker stopped before running the job.
    /// Calling this from inside a job of the same queue never resolves.
    pub async fn run<F, T>(&self, job: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let submitted = self.submit(async move {
            let _ = done_tx.send(job.await);
        });
        if !submitted {
            return None;
        }
        done_rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = SerialQueue::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let log = log.clone();
            queue.submit(async move {
                // Later jobs sleep less; ordering must still hold.
                tokio::time::sleep(Duration::from_millis(u64::from(5 - i))).await;
                log.lock().push(i);
            });
        }

        queue.run(async {}).await.unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_run_returns_job_output() {
        let queue = SerialQueue::new("test");
        assert_eq!(queue.run(async { 21 * 2 }).await, Some(42));
        assert_eq!(queue.name(), "test");
    }
}
