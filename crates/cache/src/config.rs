//! Bitmap cache configuration.
//!
//! The budget can be set programmatically, loaded from a TOML file, or
//! overridden from the environment.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

/// Environment variable overriding the cache budget, in megabytes.
pub const ENV_CACHE_MB: &str = "PAGEFLOW_BITMAP_CACHE_MB";

const MB: usize = 1024 * 1024;

/// Configuration for the bitmap cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte budget for resident bitmaps
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 128 * MB,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheFile {
    max_size_mb: Option<usize>,
}

impl CacheConfig {
    /// Create a configuration with a budget in megabytes.
    ///
    /// Budgets too large to express in bytes saturate at `usize::MAX`.
    pub fn with_mb(mb: usize) -> Self {
        Self {
            max_size_bytes: mb.saturating_mul(MB),
        }
    }

    /// Sets the budget in bytes.
    pub fn with_max_size_bytes(mut self, bytes: usize) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Returns the budget in megabytes.
    pub fn max_size_mb(&self) -> usize {
        self.max_size_bytes / MB
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGEFLOW_BITMAP_CACHE_MB`: cache budget in MB (default: 128)
    ///
    /// # Errors
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from the environment.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_CACHE_MB) {
            let mb = val
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(ENV_CACHE_MB.to_string()))?;
            self.max_size_bytes = mb_to_bytes(mb, ENV_CACHE_MB)?;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// max_size_mb = 128
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string; missing keys keep their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: CacheFile = toml::from_str(toml_str)?;
        let mut config = Self::default();
        if let Some(mb) = file.max_size_mb {
            config.max_size_bytes = mb_to_bytes(mb, "max_size_mb")?;
        }
        Ok(config)
    }
}

fn mb_to_bytes(mb: usize, key: &str) -> Result<usize, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
