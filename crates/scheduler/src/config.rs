//! Render queue configuration.

use crate::error::QueueError;

/// Environment variable overriding the number of render workers.
pub const ENV_PARALLELISM: &str = "PAGEFLOW_RENDER_PARALLELISM";

/// Upper bound for the default worker count.
pub const MAX_DEFAULT_PARALLELISM: usize = 4;

/// Configuration for the render work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of worker threads, i.e. tasks that may run concurrently.
    /// Default: logical CPU cores, capped at 4.
    pub parallelism: usize,

    /// Start with dispatch paused; nothing runs until `resume()`.
    pub start_paused: bool,

    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus().min(MAX_DEFAULT_PARALLELISM),
            start_paused: false,
            thread_name: "pageflow-render".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create a configuration with a fixed worker count.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            ..Self::default()
        }
    }

    /// Start the queue paused.
    pub fn paused(mut self) -> Self {
        self.start_paused = true;
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGEFLOW_RENDER_PARALLELISM`: number of render workers
    pub fn from_env() -> Result<Self, QueueError> {
        let mut config = Self::default();
        if let Ok(val) = std::env::var(ENV_PARALLELISM) {
            config.parallelism = val
                .trim()
                .parse::<usize>()
                .map_err(|_| QueueError::InvalidConfig(ENV_PARALLELISM.to_string()))?;
        }
        Ok(config)
    }
}

/// Get the number of logical CPU cores.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
