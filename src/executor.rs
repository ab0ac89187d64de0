// ============================================================================
// Background Executors
// ============================================================================
//
// Runs blocking work off the calling thread and hands the outcome back
// through a future. Transactions are bound per thread, so work submitted
// here never sees a transaction opened by the submitter.
//
// ============================================================================

use crate::core::{Result, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::warn;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Tokio's blocking pool when a runtime is running, a fresh thread otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

impl Executor for DefaultExecutor {
    fn execute(&self, task: Task) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => {
                if let Err(err) = std::thread::Builder::new()
                    .name("txbridge-worker".into())
                    .spawn(task)
                {
                    warn!("Failed to spawn worker thread: {}", err);
                }
            }
        }
    }
}

/// Blocking pool of a specific runtime
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| StoreError::ExecutionError(format!("No tokio runtime: {}", e)))
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}

/// Outcome of work running on an executor
#[must_use = "futures do nothing unless polled or waited on"]
pub struct ScalarFuture<E> {
    receiver: oneshot::Receiver<Result<E>>,
}

impl<E> ScalarFuture<E> {
    /// Block the current thread until the value is ready
    ///
    /// Must not be called from inside an async task; `.await` the future there.
    pub fn wait(self) -> Result<E> {
        futures::executor::block_on(self)
    }
}

impl<E> Future for ScalarFuture<E> {
    type Output = Result<E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(StoreError::ExecutionError(
                    "Background task ended without producing a value".into(),
                ))
            })
        })
    }
}

/// Run `supplier` on `executor` and return its eventual value
pub fn supply_async<E, F>(executor: &dyn Executor, supplier: F) -> ScalarFuture<E>
where
    E: Send + 'static,
    F: FnOnce() -> Result<E> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    executor.execute(Box::new(move || {
        // Receiver may already be gone; nothing left to notify.
        let _ = sender.send(supplier());
    }));
    ScalarFuture { receiver }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_executor_without_runtime() {
        let caller = thread::current().id();
        let future = supply_async(&DefaultExecutor, move || Ok(thread::current().id() != caller));
        assert!(future.wait().unwrap());
    }

    #[tokio::test]
    async fn test_default_executor_inside_runtime() {
        let value = supply_async(&DefaultExecutor, || Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_tokio_executor_propagates_errors() {
        let executor = TokioExecutor::current().unwrap();
        let result: Result<i64> =
            supply_async(&executor, || Err(StoreError::NoSuchElement("empty".into()))).await;
        assert!(matches!(result, Err(StoreError::NoSuchElement(_))));
    }

    #[test]
    fn test_panicking_task_reports_error() {
        let future: ScalarFuture<i64> = supply_async(&DefaultExecutor, || panic!("task failed"));
        assert!(matches!(future.wait(), Err(StoreError::ExecutionError(_))));
    }

    #[test]
    fn test_tokio_executor_requires_runtime() {
        assert!(TokioExecutor::current().is_err());
    }
}
