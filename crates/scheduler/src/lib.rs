//! Pageflow Scheduler Library
//!
//! Priority render work queue with cancellable workers.
//!
//! Rendering work is submitted as closures tagged with a [`RenderPriority`]
//! (visible page, nearby page, thumbnail) and executed on a fixed pool of
//! worker threads in priority order, FIFO within each priority. Background
//! (non-visible) work can be switched off at any time, which cancels it
//! wholesale while on-screen rendering carries on.
//!
//! # Example
//!
//! ```
//! use pageflow_scheduler::{QueueConfig, RenderPriority, RenderWorkQueue, Viewport};
//!
//! let queue = RenderWorkQueue::new(QueueConfig::new(2)).unwrap();
//! let viewport = Viewport::single(3, 100);
//!
//! // Render the visible page and its neighbours
//! let handles: Vec<_> = (2..=4)
//!     .map(|page| {
//!         queue.submit(viewport.priority_for(page), move |token| {
//!             token.check()?;
//!             Ok(page * 10)
//!         })
//!     })
//!     .collect();
//!
//! // The reader is struggling: drop everything that is not on screen
//! queue.set_background_work_enabled(false);
//!
//! for handle in handles {
//!     match handle.wait() {
//!         Ok(value) => println!("rendered {}", value),
//!         Err(err) if err.is_cancelled() => {}
//!         Err(err) => eprintln!("render failed: {}", err),
//!     }
//! }
//! ```

mod cancel;
mod config;
mod error;
mod handle;
mod priority;
mod queue;
mod viewport;
mod worker;

// Re-export public API
pub use cancel::{Cancelled, CancellationToken};
pub use config::{QueueConfig, ENV_PARALLELISM, MAX_DEFAULT_PARALLELISM};
pub use error::{QueueError, TaskError};
pub use handle::TaskHandle;
pub use priority::{RenderPriority, TaskId};
pub use queue::{QueueStats, RenderWorkQueue};
pub use viewport::Viewport;
