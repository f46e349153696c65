//! Render worker threads.
//!
//! Each worker blocks on the queue's condition variable, pops the most
//! important pending task, runs it outside the lock and records the outcome.
//! A panic inside the work is caught and reported through the task handle;
//! the worker keeps serving the queue.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::TaskError;
use crate::priority::{QueuedTask, TaskOutcome};
use crate::queue::{RunningTask, Shared};

/// Spawn a named worker thread serving `shared`.
pub(crate) fn spawn(index: usize, name: &str, shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-{}", name, index))
        .spawn(move || run(index, shared))
}

/// Main worker loop.
///
/// Returns once the queue shuts down.
fn run(index: usize, shared: Arc<Shared>) {
    log::trace!("render worker {} started", index);

    while let Some(task) = next_task(&shared) {
        execute(&shared, task);
    }

    log::trace!("render worker {} exiting", index);
}

/// Block until a runnable task is available, and register it as running.
///
/// Tasks whose token was flagged while queued are resolved here without
/// running.
fn next_task(shared: &Shared) -> Option<QueuedTask> {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return None;
        }

        if !state.paused {
            if let Some(task) = state.pending.pop() {
                if task.token.is_cancelled() {
                    state.cancel_queued(task);
                    shared.publish(&state);
                    continue;
                }

                state.running.insert(
                    task.id,
                    RunningTask {
                        priority: task.priority,
                        token: task.token.clone(),
                        completion: task.completion.clone(),
                    },
                );
                shared.publish(&state);
                return Some(task);
            }
        }

        state = shared
            .work_available
            .wait(state)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
    }
}

fn execute(shared: &Shared, task: QueuedTask) {
    let QueuedTask {
        id,
        priority,
        token,
        completion,
        job,
    } = task;

    log::trace!("render task {} ({:?}) started", id, priority);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job(&token))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::warn!("render task {} panicked: {}", id, message);
            completion
                .reject(TaskError::Panicked(message))
                .then_some(TaskOutcome::Failed)
        }
    };

    let mut state = shared.lock();
    state.running.remove(&id);
    if let Some(outcome) = outcome {
        state.record(outcome);
    }
    shared.publish(&state);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
