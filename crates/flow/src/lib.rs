//! Pageflow Flow Library
//!
//! Adaptive prefetch control for a page-based document reader.
//!
//! [`AdaptiveFlowController`] consumes three kinds of telemetry:
//! - page changes, from which it estimates reading speed,
//! - frame intervals, from which it detects sustained jank,
//! - accelerometer readings, from which it derives device tilt,
//!
//! and publishes which pages to prefetch, how sensitive swipes should be,
//! and whether the UI is currently under load. It does not render or cache
//! anything itself; the caller feeds its outputs into a render queue.
//!
//! # Example
//!
//! ```
//! use pageflow_flow::{AdaptiveFlowController, FlowConfig};
//!
//! let flow = AdaptiveFlowController::new(FlowConfig::default()).unwrap();
//! let under_load = flow.subscribe_ui_under_load();
//!
//! flow.track_page_change(0, 120);
//! assert_eq!(flow.preload_targets().into_iter().collect::<Vec<_>>(), vec![1]);
//!
//! // Sustained dropped frames suspend prefetching
//! for _ in 0..10 {
//!     flow.update_frame_metrics(50.0);
//! }
//! assert!(*under_load.borrow());
//! assert!(flow.preload_targets().is_empty());
//! ```

mod clock;
mod config;
mod controller;
mod frame_metrics;
mod observable;
mod reading_speed;
mod tilt;

// Re-export public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FlowConfig, ENV_PREFIX, FRAME_BUDGET_60FPS_MS};
pub use controller::{AdaptiveFlowController, FlowSnapshot};
pub use tilt::TiltSample;
