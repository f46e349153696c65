//! Render work queue
//!
//! Owns the pending task heap, the set of running tasks, and the global
//! switches (background work, pause). All of it sits behind one lock so that
//! submission, dispatch and bulk cancellation never observe each other
//! half-done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::{oneshot, watch};

use crate::cancel::CancellationToken;
use crate::config::QueueConfig;
use crate::error::{QueueError, TaskError};
use crate::handle::{Completion, Resolve, TaskHandle};
use crate::priority::{Job, QueuedTask, RenderPriority, TaskId, TaskOutcome, TaskQueue};
use crate::worker;

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total tasks submitted
    pub submitted: u64,

    /// Tasks whose work returned a value
    pub completed: u64,

    /// Tasks whose work returned an error or panicked
    pub failed: u64,

    /// Tasks resolved as cancelled
    pub cancelled: u64,

    /// Tasks waiting for a worker
    pub queued: usize,

    /// Tasks currently executing
    pub active: usize,

    /// Whether background (non-visible) work is accepted
    pub background_work_enabled: bool,

    /// Whether dispatch is paused
    pub paused: bool,
}

impl QueueStats {
    /// Tasks submitted but not yet resolved
    pub fn in_flight(&self) -> usize {
        self.queued + self.active
    }
}

/// A task a worker is executing
pub(crate) struct RunningTask {
    pub(crate) priority: RenderPriority,
    pub(crate) token: CancellationToken,
    pub(crate) completion: Arc<dyn Resolve>,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

pub(crate) struct QueueState {
    pub(crate) pending: TaskQueue,
    pub(crate) running: HashMap<TaskId, RunningTask>,
    background_work_enabled: bool,
    pub(crate) paused: bool,
    pub(crate) shutdown: bool,
    counters: Counters,
}

impl QueueState {
    fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted,
            completed: self.counters.completed,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            queued: self.pending.len(),
            active: self.running.len(),
            background_work_enabled: self.background_work_enabled,
            paused: self.paused,
        }
    }

    pub(crate) fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.counters.completed += 1,
            TaskOutcome::Failed => self.counters.failed += 1,
            TaskOutcome::Cancelled => self.counters.cancelled += 1,
        }
    }

    /// Resolve a task that never reached a worker
    pub(crate) fn cancel_queued(&mut self, task: QueuedTask) {
        task.token.cancel();
        if task.completion.reject(TaskError::Cancelled) {
            self.counters.cancelled += 1;
        }
    }

    /// Flag a running task and resolve its handle now; the work's eventual
    /// result is discarded
    fn cancel_running(&mut self, id: TaskId) -> bool {
        let Some(task) = self.running.get(&id) else {
            return false;
        };
        task.token.cancel();
        let resolved = task.completion.reject(TaskError::Cancelled);
        if resolved {
            self.counters.cancelled += 1;
        }
        resolved
    }
}

/// State shared between the queue, its workers and outstanding handles
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    pub(crate) work_available: Condvar,
    next_id: AtomicU64,
    stats: watch::Sender<QueueStats>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish current statistics to subscribers if they changed
    pub(crate) fn publish(&self, state: &QueueState) {
        let stats = state.stats();
        self.stats.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }

    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        let cancelled = match state.pending.remove(id) {
            Some(task) => {
                state.cancel_queued(task);
                true
            }
            None => state.cancel_running(id),
        };
        if cancelled {
            log::trace!("render task {} cancelled", id);
            self.publish(&state);
        }
        cancelled
    }

    /// Cancel everything and wake all workers so they exit
    fn stop(&self) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        for task in state.pending.drain_all() {
            state.cancel_queued(task);
        }
        let running: Vec<TaskId> = state.running.keys().copied().collect();
        for id in running {
            state.cancel_running(id);
        }
        self.publish(&state);
        drop(state);
        self.work_available.notify_all();
    }
}

/// Priority render work queue
///
/// Runs submitted rendering closures on a fixed pool of worker threads.
/// Whenever a worker frees up it starts the most important pending task:
/// `VisiblePage` before `NearbyPage` before `Thumbnail`, first-submitted
/// first within a priority.
///
/// Turning background work off cancels every queued and running
/// non-visible task; turning it back on only lets new submissions run.
///
/// # Example
///
/// ```
/// use pageflow_scheduler::{QueueConfig, RenderPriority, RenderWorkQueue};
///
/// let queue = RenderWorkQueue::new(QueueConfig::new(2)).unwrap();
///
/// let handle = queue.submit(RenderPriority::VisiblePage, |token| {
///     token.check()?;
///     Ok(vec![0u8; 4 * 64 * 64])
/// });
///
/// let pixels = handle.wait().unwrap();
/// assert_eq!(pixels.len(), 4 * 64 * 64);
/// ```
pub struct RenderWorkQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl RenderWorkQueue {
    /// Create a queue and start its workers
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        if config.parallelism == 0 {
            return Err(QueueError::InvalidParallelism);
        }

        let state = QueueState {
            pending: TaskQueue::default(),
            running: HashMap::new(),
            background_work_enabled: true,
            paused: config.start_paused,
            shutdown: false,
            counters: Counters::default(),
        };
        let (stats, _) = watch::channel(state.stats());
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            work_available: Condvar::new(),
            next_id: AtomicU64::new(1),
            stats,
        });

        let mut workers = Vec::with_capacity(config.parallelism);
        for index in 0..config.parallelism {
            match worker::spawn(index, &config.thread_name, shared.clone()) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    log::warn!("failed to spawn render worker {}: {}", index, err);
                    let queue = Self { shared, workers };
                    drop(queue);
                    return Err(QueueError::Spawn(err));
                }
            }
        }

        log::debug!("render queue started with {} workers", config.parallelism);
        Ok(Self { shared, workers })
    }

    /// Create a queue with `parallelism` workers and default settings
    pub fn with_parallelism(parallelism: usize) -> Result<Self, QueueError> {
        Self::new(QueueConfig::new(parallelism))
    }

    /// Submit work at a priority
    ///
    /// The work receives the task's cancellation token and should check it at
    /// safe points. The returned handle resolves to the work's value, to
    /// `TaskError::Failed`/`Panicked` if it errors, or to
    /// `TaskError::Cancelled`. Background work submitted while background
    /// work is disabled resolves as cancelled without running.
    pub fn submit<T, F>(&self, priority: RenderPriority, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let completion = Arc::new(Completion::new(tx));
        let token = CancellationToken::new();

        let job_completion = completion.clone();
        let job: Job = Box::new(move |token: &CancellationToken| {
            let result = work(token);
            let (outcome, result) = if token.is_cancelled() {
                (TaskOutcome::Cancelled, Err(TaskError::Cancelled))
            } else {
                match result {
                    Ok(value) => (TaskOutcome::Completed, Ok(value)),
                    Err(err) => {
                        log::warn!("render task {} failed: {:#}", id, err);
                        (TaskOutcome::Failed, Err(TaskError::Failed(err)))
                    }
                }
            };
            job_completion.resolve(result).then_some(outcome)
        });

        let mut state = self.shared.lock();
        state.counters.submitted += 1;

        if state.shutdown || (priority.is_background() && !state.background_work_enabled) {
            log::trace!(
                "render task {} ({:?}) rejected: background work disabled",
                id,
                priority
            );
            state.cancel_queued(QueuedTask {
                id,
                priority,
                token,
                completion,
                job,
            });
        } else {
            state.pending.push(QueuedTask {
                id,
                priority,
                token,
                completion,
                job,
            });
            self.shared.work_available.notify_one();
        }

        self.shared.publish(&state);
        TaskHandle::new(id, priority, rx, Arc::downgrade(&self.shared))
    }

    /// Enable or disable background (non-visible) work
    ///
    /// Disabling cancels every queued and running `NearbyPage`/`Thumbnail`
    /// task; their handles resolve as cancelled immediately. `VisiblePage`
    /// tasks are never touched. Enabling lets new background submissions run;
    /// cancelled tasks are not resubmitted.
    pub fn set_background_work_enabled(&self, enabled: bool) {
        let mut state = self.shared.lock();
        if state.background_work_enabled == enabled {
            return;
        }
        state.background_work_enabled = enabled;

        if enabled {
            log::info!("background render work enabled");
        } else {
            let queued = state.pending.drain_where(|task| task.priority.is_background());
            let queued_count = queued.len();
            for task in queued {
                state.cancel_queued(task);
            }

            let running: Vec<TaskId> = state
                .running
                .iter()
                .filter(|(_, task)| task.priority.is_background())
                .map(|(id, _)| *id)
                .collect();
            for id in &running {
                state.cancel_running(*id);
            }

            log::info!(
                "background render work disabled: cancelled {} queued and {} running tasks",
                queued_count,
                running.len()
            );
        }

        self.shared.publish(&state);
    }

    pub fn is_background_work_enabled(&self) -> bool {
        self.shared.lock().background_work_enabled
    }

    /// Stop dispatching queued tasks; running tasks continue
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        if !state.paused {
            state.paused = true;
            log::debug!("render queue paused");
            self.shared.publish(&state);
        }
    }

    /// Resume dispatching queued tasks
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if state.paused {
            state.paused = false;
            log::debug!("render queue resumed");
            self.shared.publish(&state);
            drop(state);
            self.shared.work_available.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Cancel a single task by ID
    ///
    /// Returns true if the task was queued or running and its handle is now
    /// resolved as cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.shared.cancel(id)
    }

    /// Current statistics
    pub fn stats(&self) -> QueueStats {
        self.shared.lock().stats()
    }

    /// Subscribe to statistics; receivers always see the latest value
    pub fn subscribe_stats(&self) -> watch::Receiver<QueueStats> {
        self.shared.stats.subscribe()
    }

    /// Number of worker threads
    pub fn parallelism(&self) -> usize {
        self.workers.len()
    }

    /// Cancel all outstanding tasks and wait for workers to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shared.stop();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("render worker exited by panic");
            }
        }
    }
}

impl Drop for RenderWorkQueue {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
