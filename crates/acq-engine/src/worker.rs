//! Bounded worker pool for action loops and per-edge runs.
//!
//! Tasks are spawned on a tokio runtime immediately but each one holds a
//! semaphore permit while it runs, so at most `max_workers` action loops are
//! active at any time. Extra tasks wait for a permit in FIFO order.
//!
//! Slave loops (0D) and per-edge runs go through
//! [`WorkerPool::spawn_unbounded`]: a bounded task waits on them, so they
//! must never queue behind it.

use acq_core::error::{AcqError, AcqResult};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Executor for acquisition tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// Pool running on the current tokio runtime.
    ///
    /// # Errors
    /// `AcqError::Worker` when called outside a runtime.
    pub fn new(max_workers: usize) -> AcqResult<Self> {
        let handle = Handle::try_current().map_err(|e| AcqError::Worker(e.to_string()))?;
        Ok(Self::with_handle(handle, max_workers))
    }

    /// Pool on `handle`; `max_workers` is raised to 1.
    pub fn with_handle(handle: Handle, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Permit count.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers currently idle.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `future` on a worker. Callable from synchronous code.
    pub fn spawn<F, T>(&self, name: &str, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let task_name = name.to_string();
        let join = self.handle.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            debug!(task = %task_name, "worker started");
            future.await
        });
        TaskHandle {
            name: name.to_string(),
            join,
        }
    }

    /// Run `future` without taking a permit.
    pub fn spawn_unbounded<F, T>(&self, name: &str, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let task_name = name.to_string();
        let join = self.handle.spawn(async move {
            debug!(task = %task_name, "unbounded worker started");
            future.await
        });
        TaskHandle {
            name: name.to_string(),
            join,
        }
    }
}

/// Handle to a task spawned on a [`WorkerPool`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: String,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task at its next suspension point.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the task's output.
    ///
    /// # Errors
    /// `AcqError::Worker` if the task panicked or was cancelled.
    pub async fn join(self) -> AcqResult<T> {
        let name = self.name;
        self.join
            .await
            .map_err(|e| AcqError::Worker(format!("{}: {}", name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                pool.spawn(&format!("task-{}", i), async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_aborted_task_reports_worker_error() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.spawn("sleeper", tokio::time::sleep(Duration::from_secs(10)));
        handle.abort();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, AcqError::Worker(msg) if msg.starts_with("sleeper")));
    }

    #[tokio::test]
    async fn test_unbounded_task_ignores_the_bound() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let holder = pool.spawn("holder", async move { rx.await.is_ok() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.available(), 0);

        let free = pool.spawn_unbounded("free", async { 7 });
        let value = tokio::time::timeout(Duration::from_secs(1), free.join())
            .await
            .expect("unbounded task queued behind the bound")
            .unwrap();
        assert_eq!(value, 7);

        tx.send(()).unwrap();
        assert!(holder.join().await.unwrap());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(WorkerPool::new(1), Err(AcqError::Worker(_))));
    }
}
