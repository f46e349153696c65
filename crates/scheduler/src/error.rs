//! Task outcomes and queue construction errors.

use std::io;

/// Why a task handle resolved without a value
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled before or while running. Not a failure.
    #[error("render task cancelled")]
    Cancelled,

    /// The work returned an error
    #[error("render task failed: {0:#}")]
    Failed(anyhow::Error),

    /// The work panicked; the worker thread survived
    #[error("render task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// True for cancellation, which callers treat as a non-error outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Errors raised while constructing a queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("parallelism must be at least 1")]
    InvalidParallelism,
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("invalid value for configuration key: {0}")]
    InvalidConfig(String),
}
