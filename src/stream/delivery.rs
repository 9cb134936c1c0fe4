use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Per-connection callback queue.
///
/// Every user callback of a connection is submitted here and run by a single task on the
/// worker, in submission order. Two callbacks of the same connection therefore never overlap,
/// and a callback may call back into its own connection without deadlocking. A panicking
/// callback is logged and does not stop the queue.
///
/// The task ends once every clone of the queue has been dropped.
#[derive(Clone)]
pub(crate) struct Delivery {
    tx: mpsc::UnboundedSender<Job>,
}

impl Delivery {
    pub(crate) fn spawn(worker: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        worker.spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Connection callback panicked");
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The queue only closes when the worker runtime is gone.
        _ = self.tx.send(Box::new(job));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn jobs_run_in_order_and_survive_panics() {
        let delivery = Delivery::spawn(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            delivery.submit(move || seen.lock().unwrap().push(i));
        }
        delivery.submit(|| panic!("callback failure"));
        let tail = Arc::clone(&seen);
        delivery.submit(move || {
            tail.lock().unwrap().push(3);
            drop(done_tx.send(()));
        });

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
