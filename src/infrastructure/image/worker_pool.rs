//! Bounded worker pool for cascade misses.
//!
//! Jobs enter an unbounded queue and are started in FIFO order as soon as a
//! concurrency permit is free. The pool owns a dedicated multi-threaded
//! runtime, so the caller's executor is never used for fetching or decoding.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Shape of the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Async worker threads kept alive for the pool's lifetime.
    pub core_workers: usize,
    /// Upper bound on threads used for blocking work (decode, file I/O).
    pub max_workers: usize,
    /// Idle time after which a blocking thread is retired.
    pub keep_alive: Duration,
    /// Jobs allowed to run at once; the rest wait in the queue.
    pub max_concurrent: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 4,
            max_workers: 8,
            keep_alive: Duration::from_secs(10),
            max_concurrent: 8,
        }
    }
}

/// Dedicated runtime fed by a job queue.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    jobs: mpsc::UnboundedSender<Job>,
    permits: Arc<Semaphore>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Starts the pool.
    ///
    /// # Errors
    /// Returns error if the runtime threads cannot be spawned.
    pub fn new(config: WorkerPoolConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.core_workers.max(1))
            .max_blocking_threads(config.max_workers.max(1))
            .thread_keep_alive(config.keep_alive)
            .thread_name(concat!(env!("CARGO_PKG_NAME"), "-worker"))
            .enable_all()
            .build()?;

        let (jobs, queue) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        runtime.spawn(Self::run_worker_loop(queue, Arc::clone(&permits)));

        debug!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            max_concurrent = config.max_concurrent,
            "Started worker pool"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            jobs,
            permits,
            config,
        })
    }

    /// Pulls jobs off the queue, waiting for a permit before starting each.
    async fn run_worker_loop(mut queue: mpsc::UnboundedReceiver<Job>, permits: Arc<Semaphore>) {
        while let Some(job) = queue.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            tokio::spawn(async move {
                job.await;
                drop(permit);
            });
        }
        debug!("Worker queue closed");
    }

    /// Queues a job. Jobs start in submission order.
    pub fn execute<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.send(Box::pin(job)).is_err() {
            error!("Worker pool is shut down, dropping job");
        }
    }

    /// Runs `task` on the pool and returns its handle. The task counts
    /// against the concurrency limit but does not wait in the queue.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let _permit = permits.acquire_owned().await;
            task.await
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // May be dropped from inside another runtime, where a blocking
        // shutdown would panic.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn small_pool(max_concurrent: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            core_workers: 2,
            max_workers: 2,
            keep_alive: Duration::from_secs(1),
            max_concurrent,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_runs_job() {
        let pool = small_pool(2);
        let (tx, rx) = oneshot::channel();

        pool.execute(async move {
            let _ = tx.send(std::thread::current().name().map(str::to_owned));
        });

        let thread = rx.await.unwrap();
        assert_eq!(thread.as_deref(), Some("pixcache-worker"));
    }

    #[tokio::test]
    async fn test_spawn_returns_output() {
        let pool = small_pool(2);
        let handle = pool.spawn(async { 21 * 2 });
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = small_pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.execute(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            });
        }

        for _ in 0..6 {
            done_rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_jobs_start_in_submission_order() {
        let pool = small_pool(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..5 {
            let tx = tx.clone();
            pool.execute(async move {
                let _ = tx.send(i);
            });
        }

        let mut order = Vec::new();
        for _ in 0..5 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_drop_inside_runtime_does_not_panic() {
        let pool = small_pool(1);
        pool.execute(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        drop(pool);
    }
}
