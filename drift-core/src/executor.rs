//! Where buffering work runs.
//!
//! The ingestor never awaits buffering on the caller's path when it can avoid
//! it. It submits a [`Task`] to a [`TaskExecutor`]; when the executor hands
//! the task back ([`Rejected`]) the ingestor runs it inline instead.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

pub type Task = BoxFuture<'static, ()>;

/// A task the executor refused; the caller decides what to do with it.
pub struct Rejected(pub Task);

impl Rejected {
    pub fn into_task(self) -> Task {
        self.0
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

pub trait TaskExecutor: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), Rejected>;
}

/// Spawns tasks on the current tokio runtime with a cap on how many may be in
/// flight. Rejects when the cap is reached or no runtime is reachable from
/// the submitting thread.
pub struct TokioExecutor {
    handle: Option<Handle>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("max_in_flight", &self.max_in_flight)
            .field("available", &self.permits.available_permits())
            .field("pinned_runtime", &self.handle.is_some())
            .finish()
    }
}

impl TokioExecutor {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            handle: None,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Always spawn onto `handle` instead of the submitting thread's runtime.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }
}

impl TaskExecutor for TokioExecutor {
    fn submit(&self, task: Task) -> Result<(), Rejected> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => return Err(Rejected(task)),
            },
        };
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(Rejected(task));
        };

        handle.spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }
}

/// Rejects everything, so every task runs on the submitting caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn submit(&self, task: Task) -> Result<(), Rejected> {
        Err(Rejected(task))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use tokio::sync::Notify;

    use super::*;

    #[test]
    fn rejects_without_runtime() {
        let executor = TokioExecutor::new(4);
        assert!(executor.submit(async {}.boxed()).is_err());
    }

    #[test]
    fn inline_executor_hands_everything_back() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let rejected = InlineExecutor
            .submit(
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            )
            .unwrap_err();

        futures::executor::block_on(rejected.into_task());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn saturation_rejects_until_a_permit_frees() {
        let executor = TokioExecutor::new(1);
        let release = Arc::new(Notify::new());

        let gate = Arc::clone(&release);
        executor
            .submit(async move { gate.notified().await }.boxed())
            .unwrap();
        assert_eq!(executor.in_flight(), 1);
        assert!(executor.submit(async {}.boxed()).is_err());

        release.notify_one();
        while executor.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert!(executor.submit(async {}.boxed()).is_ok());
    }
}
