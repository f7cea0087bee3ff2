//! The fixed worker pool behind broadcast fan-outs (§4.1: "a slow socket on
//! one shard cannot block others"). Uses the same semaphore-gated dispatch
//! as `automations::server::serve`: acquire an owned
//! permit before spawning, so a bounded number of fan-out tasks run
//! concurrently regardless of how many shards or recipients a broadcast
//! touches.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
#[error("worker pool is shutting down, submission rejected")]
pub struct PoolShuttingDown;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submits `task` to run on the pool. Fails fast, without spawning,
    /// once [`WorkerPool::shutdown`] has been called — per §4.1, "submissions
    /// during shutdown fail fast" rather than queuing behind in-flight work.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolShuttingDown>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PoolShuttingDown);
        }
        let permit = self.semaphore.clone().acquire_owned().await.unwrap();
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    /// Stops accepting new submissions and waits for in-flight tasks to
    /// drain by reacquiring every permit.
    pub async fn shutdown(&self, size: usize) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self
            .semaphore
            .acquire_many_owned(size.max(1) as u32)
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        // Give the spawned tasks a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn rejects_submissions_after_shutdown() {
        let pool = WorkerPool::new(2);
        pool.shutdown(2).await;
        let result = pool.submit(async {}).await;
        assert!(result.is_err());
    }
}
