//! Cancellation tokens for render tasks
//!
//! Every submitted task receives a token. Long-running rasterization work
//! checks it at safe points and unwinds early; the queue never interrupts a
//! worker thread.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Returned by [`CancellationToken::check`] once the task has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render task cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Cancellation token for cooperative task cancellation
///
/// Work can periodically check `is_cancelled()` (or `check()?`) to determine
/// if it should stop processing. Clones share the same cancellation state.
///
/// # Example
///
/// ```
/// use pageflow_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// let render_rows = move || -> Result<usize, pageflow_scheduler::Cancelled> {
///     let mut rows = 0;
///     for _ in 0..1080 {
///         worker_token.check()?;
///         rows += 1;
///     }
///     Ok(rows)
/// };
///
/// token.cancel();
/// assert!(render_rows().is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token
    ///
    /// All clones of this token observe the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Checkpoint for work loops: `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
