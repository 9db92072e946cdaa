//! Delayed execution of callbacks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Work to run once a delay has elapsed.
pub type TaskCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Something that can stop a pending task.
pub trait CancelTask: Send + Sync {
    /// Stop the task if it has not fired yet. No-op otherwise.
    fn cancel(&self);

    /// Whether the task fired or was cancelled.
    fn is_done(&self) -> bool;
}

/// Handle to a scheduled callback.
pub struct TaskHandle {
    inner: Box<dyn CancelTask>,
}

impl TaskHandle {
    pub fn new(inner: impl CancelTask + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Runs callbacks after a delay.
pub trait TaskScheduler: Send + Sync {
    /// Arrange for `callback` to run once `delay` has elapsed.
    ///
    /// Must not run the callback before returning.
    fn schedule(&self, delay: Duration, callback: TaskCallback) -> TaskHandle;
}

impl CancelTask for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }

    fn is_done(&self) -> bool {
        self.is_finished()
    }
}

/// Tokio timers on the runtime the scheduler was created in.
///
/// The timer and the callback are separate tasks: cancelling a handle stops a
/// pending timer but never interrupts a callback that has already started.
#[derive(Debug, Clone)]
pub struct TokioTaskScheduler {
    runtime: Handle,
}

impl TokioTaskScheduler {
    /// Use the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl TaskScheduler for TokioTaskScheduler {
    fn schedule(&self, delay: Duration, callback: TaskCallback) -> TaskHandle {
        let runtime = self.runtime.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            runtime.spawn(callback());
        });
        TaskHandle::new(timer.abort_handle())
    }
}
