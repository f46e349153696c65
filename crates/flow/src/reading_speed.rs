//! Reading-speed estimation from page turns.
//!
//! Keeps the last few page turns and measures pages covered over the time
//! they span, then smooths successive measurements with an exponential
//! moving average so one hurried or lingering turn cannot swing the result.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::FlowConfig;

#[derive(Debug, Clone, Copy)]
struct PageTurn {
    page: usize,
    at: Duration,
}

/// Smoothed pages-per-minute estimate
#[derive(Debug, Default)]
pub(crate) struct ReadingSpeed {
    /// Recent turns, oldest first; at most `speed_window + 1` entries
    turns: VecDeque<PageTurn>,
    pages_per_minute: f64,
}

impl ReadingSpeed {
    pub(crate) fn pages_per_minute(&self) -> f64 {
        self.pages_per_minute
    }

    /// Record that `page` is now shown at time `at`, returning the new estimate
    pub(crate) fn record(&mut self, page: usize, at: Duration, config: &FlowConfig) -> f64 {
        if let Some(last) = self.turns.back().copied() {
            if last.page == page {
                return self.pages_per_minute;
            }

            if at.saturating_sub(last.at) >= config.idle_reset() {
                log::debug!(
                    "reading speed reset after {:?} idle",
                    at.saturating_sub(last.at)
                );
                self.turns.clear();
                self.pages_per_minute = 0.0;
            } else if last.page.abs_diff(page) > config.jump_threshold_pages {
                log::debug!("jump from page {} to {}, restarting speed window", last.page, page);
                self.turns.clear();
            }
        }

        self.turns.push_back(PageTurn { page, at });
        while self.turns.len() > config.speed_window + 1 {
            self.turns.pop_front();
        }

        if let Some(measured) = self.measure() {
            self.pages_per_minute = if self.pages_per_minute > 0.0 {
                config.speed_smoothing * measured
                    + (1.0 - config.speed_smoothing) * self.pages_per_minute
            } else {
                measured
            };
            log::trace!(
                "reading speed measured {:.1} ppm, smoothed {:.1} ppm",
                measured,
                self.pages_per_minute
            );
        }

        self.pages_per_minute
    }

    /// Pages covered per minute across the window
    fn measure(&self) -> Option<f64> {
        let first = self.turns.front()?;
        let last = self.turns.back()?;
        let elapsed = last.at.checked_sub(first.at)?;
        if elapsed.is_zero() {
            return None;
        }

        let pages: usize = self
            .turns
            .iter()
            .zip(self.turns.iter().skip(1))
            .map(|(a, b)| a.page.abs_diff(b.page))
            .sum();

        Some(pages as f64 * 60.0 / elapsed.as_secs_f64())
    }

    pub(crate) fn reset(&mut self) {
        self.turns.clear();
        self.pages_per_minute = 0.0;
    }
}
