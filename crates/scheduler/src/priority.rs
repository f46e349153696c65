//! Priority ordering for render tasks
//!
//! Pending tasks are kept in a max-heap keyed by `(priority, submission
//! order)`: the most important priority first, and first-submitted-first-run
//! within a priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::handle::Resolve;

/// Task priority levels
///
/// Higher variants are more important and are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPriority {
    /// Thumbnail strip rendering (lowest priority)
    Thumbnail = 0,

    /// Prefetch of pages near the viewport
    NearbyPage = 1,

    /// Pages currently on screen (highest priority, never cancelled in bulk)
    VisiblePage = 2,
}

impl RenderPriority {
    /// Background work is everything that is not on screen
    pub fn is_background(self) -> bool {
        self != RenderPriority::VisiblePage
    }
}

/// Unique task identifier, also the submission sequence number
pub type TaskId = u64;

/// Work closure after type erasure: runs the work, resolves the completion
/// slot, and reports what happened (or `None` if the task was resolved by
/// someone else first).
pub(crate) type Job = Box<dyn FnOnce(&CancellationToken) -> Option<TaskOutcome> + Send>;

/// How a task that ran to the end was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// A pending task
pub(crate) struct QueuedTask {
    pub(crate) id: TaskId,
    pub(crate) priority: RenderPriority,
    pub(crate) token: CancellationToken,
    pub(crate) completion: Arc<dyn Resolve>,
    pub(crate) job: Job,
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare by priority (higher priority first)
        match self.priority.cmp(&other.priority) {
            // Earlier submission first; reversed because BinaryHeap is a max heap
            Ordering::Equal => other.id.cmp(&self.id),
            other => other,
        }
    }
}

/// Pending task heap. Not synchronized; lives inside the queue state lock.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    /// Pop the most important, earliest submitted task
    pub(crate) fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove and return every task matching the predicate
    pub(crate) fn drain_where<F>(&mut self, predicate: F) -> Vec<QueuedTask>
    where
        F: Fn(&QueuedTask) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|task| predicate(task));
        self.heap = kept.into();
        removed
    }

    /// Remove one task by ID
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<QueuedTask> {
        self.drain_where(|task| task.id == id).pop()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<QueuedTask> {
        std::mem::take(&mut self.heap).into_vec()
    }
}
