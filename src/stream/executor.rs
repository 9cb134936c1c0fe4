use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Execution context shared by every connection built from the same client.
///
/// The scheduler runs connect attempts and backoff delays; the worker runs channel I/O and
/// callback delivery. Both are handles to runtimes owned elsewhere, so they may point at the
/// same runtime. [`Executor::shutdown`] stops the scheduler from accepting new attempts and
/// drops any delay that has not elapsed yet.
#[derive(Debug, Clone)]
pub struct Executor {
    scheduler: Handle,
    worker: Handle,
    shutdown: CancellationToken,
}

impl Executor {
    #[must_use]
    pub fn new(scheduler: Handle, worker: Handle) -> Self {
        Self {
            scheduler,
            worker,
            shutdown: CancellationToken::new(),
        }
    }

    /// Uses the runtime the caller is running on for both scheduling and I/O.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()?;
        Ok(Self::new(handle.clone(), handle))
    }

    #[must_use]
    pub fn worker(&self) -> &Handle {
        &self.worker
    }

    /// Whether the scheduler still accepts work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting new attempts. Pending delays are dropped without running their task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs `task` on the scheduler once `delay` has elapsed, unless the executor is shut down
    /// first.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.scheduler.spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {}
                () = sleep(delay) => task.await,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn scheduled_task_runs_after_delay() {
        let executor = Executor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        executor.schedule(Duration::from_millis(10), async move {
            drop(tx.send(()));
        });

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_pending_tasks() {
        let executor = Executor::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        executor.schedule(Duration::from_millis(50), async move {
            flag.store(true, Ordering::SeqCst);
        });
        executor.shutdown();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.is_shutdown(), "executor should report shutdown");
        assert!(!ran.load(Ordering::SeqCst), "task must not run after shutdown");
    }
}
