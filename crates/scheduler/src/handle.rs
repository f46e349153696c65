//! Task handles and the completion slots behind them
//!
//! A task resolves exactly once. Whoever resolves first wins: the worker
//! finishing the work, or the queue cancelling it. Later attempts are no-ops,
//! which is how the result of work cancelled mid-flight gets discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::priority::{RenderPriority, TaskId};
use crate::queue::Shared;

pub(crate) type TaskResult<T> = Result<T, TaskError>;

/// One-shot completion slot for a task producing `T`
pub(crate) struct Completion<T> {
    tx: Mutex<Option<oneshot::Sender<TaskResult<T>>>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(tx: oneshot::Sender<TaskResult<T>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Deliver the outcome. Returns false if the task was already resolved.
    pub(crate) fn resolve(&self, result: TaskResult<T>) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                // The awaiter may have dropped its handle; the task still counts as resolved.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// Type-erased view of a completion slot, used by the queue to fail tasks
/// without knowing their output type
pub(crate) trait Resolve: Send + Sync {
    fn reject(&self, error: TaskError) -> bool;
}

impl<T: Send> Resolve for Completion<T> {
    fn reject(&self, error: TaskError) -> bool {
        self.resolve(Err(error))
    }
}

/// Handle to a submitted render task
///
/// Await it (it is a `Future`) or call [`TaskHandle::wait`] from a plain
/// thread. Dropping the handle does not cancel the task.
#[must_use = "dropping a task handle discards the rendered result"]
pub struct TaskHandle<T> {
    id: TaskId,
    priority: RenderPriority,
    rx: oneshot::Receiver<TaskResult<T>>,
    queue: Weak<Shared>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        priority: RenderPriority,
        rx: oneshot::Receiver<TaskResult<T>>,
        queue: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            priority,
            rx,
            queue,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> RenderPriority {
        self.priority
    }

    /// Cancel this task
    ///
    /// A queued task is dropped without running; a running task has its token
    /// flagged. Either way the handle resolves to `TaskError::Cancelled`
    /// unless the task had already finished. Returns true if it was cancelled.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|shared| shared.cancel(self.id))
    }

    /// Non-blocking poll for the outcome
    pub fn try_result(&mut self) -> Option<TaskResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Cancelled)),
        }
    }

    /// Block the current thread until the task resolves
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async runtime; await the handle there.
    pub fn wait(self) -> TaskResult<T> {
        self.rx.blocking_recv().unwrap_or(Err(TaskError::Cancelled))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(TaskError::Cancelled)))
    }
}
