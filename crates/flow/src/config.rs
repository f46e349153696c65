//! Flow controller tuning.
//!
//! Every threshold the controller uses lives here. Values can be set
//! programmatically, loaded from a TOML file, or overridden from the
//! environment (`PAGEFLOW_FLOW_<KEY>`, e.g. `PAGEFLOW_FLOW_COOLDOWN_MS`).

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Prefix for environment overrides; the key is the upper-cased field name.
pub const ENV_PREFIX: &str = "PAGEFLOW_FLOW_";

/// Frame interval at 60 FPS, in milliseconds
pub const FRAME_BUDGET_60FPS_MS: f64 = 1000.0 / 60.0;

/// Configuration for the adaptive flow controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Frame samples in the rolling jank average.
    pub frame_window: usize,

    /// Frame interval above which a frame counts as janky (ms).
    /// Default: 1.5x the 60 FPS budget.
    pub jank_threshold_ms: f64,

    /// Consecutive janky frames required before entering the under-load state.
    pub min_consecutive_jank_samples: usize,

    /// Frame intervals above this are discarded as bogus (ms).
    pub max_plausible_frame_ms: f64,

    /// Time after the last jank before prefetching may resume (ms).
    pub cooldown_ms: u64,

    /// Page turns kept for the reading-speed estimate.
    pub speed_window: usize,

    /// Weight of the newest measurement in the smoothed speed (0, 1].
    pub speed_smoothing: f64,

    /// A gap between page turns longer than this restarts the estimate (ms).
    pub idle_reset_ms: u64,

    /// A navigation spanning more pages than this is a jump, not reading.
    pub jump_threshold_pages: usize,

    /// Pages prefetched ahead while reading slowly.
    pub min_preload_pages: usize,

    /// Upper bound on pages prefetched ahead.
    pub max_preload_pages: usize,

    /// Reading speed (pages per minute) that earns one extra prefetched page.
    pub pages_per_minute_per_extra_page: f64,

    /// Weight of the newest accelerometer reading in the low-pass filter (0, 1].
    pub tilt_smoothing: f64,

    /// Pitch of a device held for comfortable reading (degrees).
    pub neutral_pitch_degrees: f64,

    /// Pitch deviation ignored as hand wobble (degrees).
    pub tilt_dead_zone_degrees: f64,

    /// Pitch deviation at which sensitivity saturates (degrees).
    pub max_tilt_degrees: f64,

    /// Swipe sensitivity at full tilt; 1.0 is baseline.
    pub max_swipe_sensitivity: f64,

    /// Extra prefetched pages at full tilt while actively reading.
    pub tilt_extra_pages: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            frame_window: 10,
            jank_threshold_ms: FRAME_BUDGET_60FPS_MS * 1.5,
            min_consecutive_jank_samples: 5,
            max_plausible_frame_ms: 1000.0,
            cooldown_ms: 2_000,
            speed_window: 5,
            speed_smoothing: 0.5,
            idle_reset_ms: 30_000,
            jump_threshold_pages: 10,
            min_preload_pages: 1,
            max_preload_pages: 8,
            pages_per_minute_per_extra_page: 10.0,
            tilt_smoothing: 0.2,
            neutral_pitch_degrees: 40.0,
            tilt_dead_zone_degrees: 10.0,
            max_tilt_degrees: 45.0,
            max_swipe_sensitivity: 2.0,
            tilt_extra_pages: 2,
        }
    }
}

impl FlowConfig {
    /// Sets the jank threshold and the consecutive-sample requirement.
    pub fn with_jank(mut self, threshold_ms: f64, min_consecutive: usize) -> Self {
        self.jank_threshold_ms = threshold_ms;
        self.min_consecutive_jank_samples = min_consecutive;
        self
    }

    /// Sets the under-load cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Sets the prefetch window bounds.
    pub fn with_preload_range(mut self, min_pages: usize, max_pages: usize) -> Self {
        self.min_preload_pages = min_pages;
        self.max_preload_pages = max_pages;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn idle_reset(&self) -> Duration {
        Duration::from_millis(self.idle_reset_ms)
    }

    /// Checks that the values are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(value: f64) -> bool {
            value.is_finite() && value > 0.0
        }
        fn unit_weight(value: f64) -> bool {
            positive(value) && value <= 1.0
        }
        fn invalid(key: &str) -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue(key.to_string()))
        }

        if self.frame_window == 0 {
            return invalid("frame_window");
        }
        if !positive(self.jank_threshold_ms) {
            return invalid("jank_threshold_ms");
        }
        if self.min_consecutive_jank_samples == 0 {
            return invalid("min_consecutive_jank_samples");
        }
        if !positive(self.max_plausible_frame_ms)
            || self.max_plausible_frame_ms <= self.jank_threshold_ms
        {
            return invalid("max_plausible_frame_ms");
        }
        if self.speed_window == 0 {
            return invalid("speed_window");
        }
        if !unit_weight(self.speed_smoothing) {
            return invalid("speed_smoothing");
        }
        if self.min_preload_pages > self.max_preload_pages {
            return invalid("min_preload_pages");
        }
        if self.tilt_extra_pages > self.max_preload_pages {
            return invalid("tilt_extra_pages");
        }
        if !positive(self.pages_per_minute_per_extra_page) {
            return invalid("pages_per_minute_per_extra_page");
        }
        if !unit_weight(self.tilt_smoothing) {
            return invalid("tilt_smoothing");
        }
        if !self.neutral_pitch_degrees.is_finite() || self.neutral_pitch_degrees.abs() > 90.0 {
            return invalid("neutral_pitch_degrees");
        }
        if !self.tilt_dead_zone_degrees.is_finite() || self.tilt_dead_zone_degrees < 0.0 {
            return invalid("tilt_dead_zone_degrees");
        }
        if !self.max_tilt_degrees.is_finite() || self.max_tilt_degrees <= self.tilt_dead_zone_degrees
        {
            return invalid("max_tilt_degrees");
        }
        if !self.max_swipe_sensitivity.is_finite() || self.max_swipe_sensitivity < 1.0 {
            return invalid("max_swipe_sensitivity");
        }
        Ok(())
    }

    /// Loads configuration from environment variables over the defaults.
    ///
    /// Each field can be overridden by `PAGEFLOW_FLOW_` followed by the field
    /// name in upper case, e.g. `PAGEFLOW_FLOW_JANK_THRESHOLD_MS=30`.
    ///
    /// # Errors
    /// Returns an error if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from the environment.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        macro_rules! override_from_env {
            ($config:expr; $($field:ident),+ $(,)?) => {
                $(
                    if let Some(value) = env_value(stringify!($field))? {
                        $config.$field = value;
                    }
                )+
            };
        }

        override_from_env!(
            self;
            frame_window,
            jank_threshold_ms,
            min_consecutive_jank_samples,
            max_plausible_frame_ms,
            cooldown_ms,
            speed_window,
            speed_smoothing,
            idle_reset_ms,
            jump_threshold_pages,
            min_preload_pages,
            max_preload_pages,
            pages_per_minute_per_extra_page,
            tilt_smoothing,
            neutral_pitch_degrees,
            tilt_dead_zone_degrees,
            max_tilt_degrees,
            max_swipe_sensitivity,
            tilt_extra_pages,
        );

        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (any subset of keys):
    /// ```toml
    /// jank_threshold_ms = 25.0
    /// min_consecutive_jank_samples = 5
    /// cooldown_ms = 2000
    /// max_preload_pages = 8
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string; missing keys keep their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}

fn env_value<T: FromStr>(field: &str) -> Result<Option<T>, ConfigError> {
    let key = format!("{}{}", ENV_PREFIX, field.to_ascii_uppercase());
    match std::env::var(&key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(None),
    }
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
