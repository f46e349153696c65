//! Jank detection from frame intervals.
//!
//! A rolling window of recent frame intervals feeds two signals: the window
//! average and the length of the current run of janky frames. Load is only
//! reported when both agree, so a single long frame never counts.

use std::collections::VecDeque;

use crate::config::FlowConfig;

/// What a frame sample amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameVerdict {
    /// Not a usable sample; state unchanged
    Rejected,
    /// Recorded, no sustained jank
    Smooth,
    /// Recorded, and the recent frames are sustained jank
    Jank,
}

#[derive(Debug, Default)]
pub(crate) struct FrameMetrics {
    intervals: VecDeque<f64>,
    consecutive_jank: usize,
}

impl FrameMetrics {
    pub(crate) fn record(&mut self, interval_ms: f64, config: &FlowConfig) -> FrameVerdict {
        if !is_plausible(interval_ms, config) {
            return FrameVerdict::Rejected;
        }

        self.intervals.push_back(interval_ms);
        while self.intervals.len() > config.frame_window {
            self.intervals.pop_front();
        }

        if interval_ms > config.jank_threshold_ms {
            self.consecutive_jank += 1;
        } else {
            self.consecutive_jank = 0;
        }

        if self.average_ms() > config.jank_threshold_ms
            && self.consecutive_jank >= config.min_consecutive_jank_samples
        {
            FrameVerdict::Jank
        } else {
            FrameVerdict::Smooth
        }
    }

    /// Rolling average frame interval; zero before the first sample
    pub(crate) fn average_ms(&self) -> f64 {
        if self.intervals.is_empty() {
            0.0
        } else {
            self.intervals.iter().sum::<f64>() / self.intervals.len() as f64
        }
    }

    pub(crate) fn consecutive_jank(&self) -> usize {
        self.consecutive_jank
    }

    pub(crate) fn reset(&mut self) {
        self.intervals.clear();
        self.consecutive_jank = 0;
    }
}

fn is_plausible(interval_ms: f64, config: &FlowConfig) -> bool {
    interval_ms.is_finite() && interval_ms > 0.0 && interval_ms <= config.max_plausible_frame_ms
}
