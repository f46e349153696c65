//! Adaptive flow controller
//!
//! Turns navigation, frame timing and tilt telemetry into a prefetch plan
//! and a swipe sensitivity, and raises a "UI under load" flag the caller
//! uses to stop background rendering.
//!
//! The controller has two states:
//! - **Normal**: prefetch targets follow the reading position and speed.
//! - **UnderLoad**: entered on sustained jank; targets are empty.
//!
//! Leaving `UnderLoad` needs both the cooldown to have elapsed since the
//! last jank and a page change to re-evaluate on. Frame and sensor updates
//! never end it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, FlowConfig};
use crate::frame_metrics::{FrameMetrics, FrameVerdict};
use crate::observable::Observable;
use crate::reading_speed::ReadingSpeed;
use crate::tilt::{TiltFilter, TiltSample};

/// All controller outputs at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub reading_speed_pages_per_minute: f64,
    pub preload_targets: BTreeSet<usize>,
    pub swipe_sensitivity: f64,
    pub ui_under_load: bool,
    /// Rolling average of accepted frame intervals
    pub frame_interval_millis: f64,
}

impl Default for FlowSnapshot {
    fn default() -> Self {
        Self {
            reading_speed_pages_per_minute: 0.0,
            preload_targets: BTreeSet::new(),
            swipe_sensitivity: 1.0,
            ui_under_load: false,
            frame_interval_millis: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    page: usize,
    page_count: usize,
}

#[derive(Debug, Default)]
struct FlowState {
    speed: ReadingSpeed,
    frames: FrameMetrics,
    tilt: TiltFilter,
    tilt_intensity: f64,
    position: Option<Position>,
    under_load: bool,
    last_jank_at: Option<Duration>,
}

#[derive(Debug)]
struct Outputs {
    reading_speed: Observable<f64>,
    preload_targets: Observable<BTreeSet<usize>>,
    swipe_sensitivity: Observable<f64>,
    ui_under_load: Observable<bool>,
    frame_interval: Observable<f64>,
}

impl Outputs {
    fn new(initial: FlowSnapshot) -> Self {
        Self {
            reading_speed: Observable::new(initial.reading_speed_pages_per_minute),
            preload_targets: Observable::new(initial.preload_targets),
            swipe_sensitivity: Observable::new(initial.swipe_sensitivity),
            ui_under_load: Observable::new(initial.ui_under_load),
            frame_interval: Observable::new(initial.frame_interval_millis),
        }
    }
}

/// Adaptive prefetch and load controller
///
/// Safe to call from several threads (UI thread, sensor callbacks); all
/// updates are serialized through one lock. Outputs are exposed both as
/// getters and as last-value-wins `watch` streams.
///
/// # Example
///
/// ```
/// use pageflow_flow::{AdaptiveFlowController, FlowConfig, ManualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new());
/// let flow = AdaptiveFlowController::with_clock(FlowConfig::default(), clock.clone()).unwrap();
///
/// for page in 0..5 {
///     flow.track_page_change(page, 300);
///     clock.advance(Duration::from_secs(3));
/// }
///
/// // About 20 pages per minute earns a few pages of lookahead
/// assert!(flow.reading_speed_pages_per_minute() > 19.0);
/// assert!(flow.preload_targets().contains(&5));
/// assert!(!flow.is_ui_under_load());
/// ```
#[derive(Debug)]
pub struct AdaptiveFlowController {
    config: FlowConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<FlowState>,
    outputs: Outputs,
}

impl Default for AdaptiveFlowController {
    fn default() -> Self {
        Self::build(FlowConfig::default(), Arc::new(SystemClock::new()))
    }
}

impl AdaptiveFlowController {
    /// Create a controller using the system clock
    pub fn new(config: FlowConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a controller with an injected clock
    pub fn with_clock(config: FlowConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: FlowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(FlowState::default()),
            outputs: Outputs::new(FlowSnapshot::default()),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that the reader is now on `page_index` of `page_count`
    ///
    /// Updates the reading speed, ends `UnderLoad` if the cooldown has
    /// elapsed, and recomputes prefetch targets while `Normal`. Positions
    /// outside the document are ignored.
    pub fn track_page_change(&self, page_index: usize, page_count: usize) {
        if page_index >= page_count {
            log::debug!(
                "ignoring page change to {} of {} pages",
                page_index,
                page_count
            );
            return;
        }

        let now = self.clock.now();
        let mut state = self.lock();
        state.position = Some(Position {
            page: page_index,
            page_count,
        });

        let speed = state.speed.record(page_index, now, &self.config);
        self.outputs.reading_speed.set(speed);

        if state.under_load {
            let since_jank = state
                .last_jank_at
                .map_or(Duration::MAX, |at| now.saturating_sub(at));
            if since_jank < self.config.cooldown() {
                log::trace!(
                    "still under load, {:?} of {:?} cooldown elapsed",
                    since_jank,
                    self.config.cooldown()
                );
                return;
            }

            state.under_load = false;
            // Fresh window: re-entering needs a new run of janky frames
            state.frames.reset();
            log::info!("UI load cleared after {:?}, resuming prefetch", since_jank);
            self.outputs.ui_under_load.set(false);
        }

        self.refresh_targets(&state);
    }

    /// Record one frame interval in milliseconds
    ///
    /// Non-finite, non-positive and implausibly large values are discarded.
    /// Sustained jank switches to `UnderLoad` and clears prefetch targets.
    pub fn update_frame_metrics(&self, frame_interval_ms: f64) {
        let mut state = self.lock();
        let verdict = state.frames.record(frame_interval_ms, &self.config);
        if verdict == FrameVerdict::Rejected {
            log::debug!("discarding frame interval sample {}", frame_interval_ms);
            return;
        }

        self.outputs.frame_interval.set(state.frames.average_ms());

        if verdict == FrameVerdict::Jank {
            state.last_jank_at = Some(self.clock.now());
            if !state.under_load {
                state.under_load = true;
                log::info!(
                    "UI under load: average frame {:.1} ms over {} janky frames, suspending prefetch",
                    state.frames.average_ms(),
                    state.frames.consecutive_jank()
                );
                self.outputs.preload_targets.set(BTreeSet::new());
                self.outputs.ui_under_load.set(true);
            }
        }
    }

    /// Record an accelerometer reading
    ///
    /// Adjusts the swipe sensitivity and, while `Normal` and actively
    /// reading, widens the prefetch window with tilt.
    pub fn on_sensor_changed(&self, sample: TiltSample) {
        let mut state = self.lock();
        let Some(reading) = state.tilt.record(sample, &self.config) else {
            log::debug!("discarding tilt sample {:?}", sample);
            return;
        };

        log::trace!(
            "tilt pitch {:.1} deg, sensitivity {:.2}",
            reading.pitch_degrees,
            reading.swipe_sensitivity
        );
        state.tilt_intensity = reading.intensity;
        self.outputs.swipe_sensitivity.set(reading.swipe_sensitivity);

        if !state.under_load {
            self.refresh_targets(&state);
        }
    }

    /// Return to the initial state, e.g. when a document is closed
    pub fn reset(&self) {
        let mut state = self.lock();
        state.speed.reset();
        state.frames.reset();
        state.tilt.reset();
        state.tilt_intensity = 0.0;
        state.position = None;
        state.under_load = false;
        state.last_jank_at = None;

        let baseline = FlowSnapshot::default();
        self.outputs
            .reading_speed
            .set(baseline.reading_speed_pages_per_minute);
        self.outputs.preload_targets.set(baseline.preload_targets);
        self.outputs.swipe_sensitivity.set(baseline.swipe_sensitivity);
        self.outputs.ui_under_load.set(baseline.ui_under_load);
        self.outputs.frame_interval.set(baseline.frame_interval_millis);
        log::debug!("flow controller reset");
    }

    fn refresh_targets(&self, state: &FlowState) {
        let Some(position) = state.position else {
            return;
        };
        let targets = preload_window(
            position,
            state.speed.pages_per_minute(),
            state.tilt_intensity,
            &self.config,
        );
        if self.outputs.preload_targets.set(targets) {
            log::trace!(
                "preload targets after page {}: {:?}",
                position.page,
                self.outputs.preload_targets.get()
            );
        }
    }

    /// All outputs at once, consistent with each other
    pub fn snapshot(&self) -> FlowSnapshot {
        let _state = self.lock();
        FlowSnapshot {
            reading_speed_pages_per_minute: self.outputs.reading_speed.get(),
            preload_targets: self.outputs.preload_targets.get(),
            swipe_sensitivity: self.outputs.swipe_sensitivity.get(),
            ui_under_load: self.outputs.ui_under_load.get(),
            frame_interval_millis: self.outputs.frame_interval.get(),
        }
    }

    pub fn reading_speed_pages_per_minute(&self) -> f64 {
        self.outputs.reading_speed.get()
    }

    pub fn preload_targets(&self) -> BTreeSet<usize> {
        self.outputs.preload_targets.get()
    }

    pub fn swipe_sensitivity(&self) -> f64 {
        self.outputs.swipe_sensitivity.get()
    }

    pub fn is_ui_under_load(&self) -> bool {
        self.outputs.ui_under_load.get()
    }

    pub fn frame_interval_millis(&self) -> f64 {
        self.outputs.frame_interval.get()
    }

    pub fn subscribe_reading_speed(&self) -> watch::Receiver<f64> {
        self.outputs.reading_speed.subscribe()
    }

    pub fn subscribe_preload_targets(&self) -> watch::Receiver<BTreeSet<usize>> {
        self.outputs.preload_targets.subscribe()
    }

    pub fn subscribe_swipe_sensitivity(&self) -> watch::Receiver<f64> {
        self.outputs.swipe_sensitivity.subscribe()
    }

    pub fn subscribe_ui_under_load(&self) -> watch::Receiver<bool> {
        self.outputs.ui_under_load.subscribe()
    }

    pub fn subscribe_frame_interval(&self) -> watch::Receiver<f64> {
        self.outputs.frame_interval.subscribe()
    }
}

/// Number of pages to prefetch ahead
fn preload_size(pages_per_minute: f64, tilt_intensity: f64, config: &FlowConfig) -> usize {
    let speed_pages = (pages_per_minute / config.pages_per_minute_per_extra_page).floor() as usize;
    let tilt_pages = if pages_per_minute > 0.0 {
        (tilt_intensity * config.tilt_extra_pages as f64).round() as usize
    } else {
        0
    };
    config
        .min_preload_pages
        .saturating_add(speed_pages)
        .saturating_add(tilt_pages)
        .min(config.max_preload_pages)
}

/// Contiguous pages following `position`, clamped to the document
fn preload_window(
    position: Position,
    pages_per_minute: f64,
    tilt_intensity: f64,
    config: &FlowConfig,
) -> BTreeSet<usize> {
    let size = preload_size(pages_per_minute, tilt_intensity, config);
    let start = position.page.saturating_add(1);
    let end = position.page.saturating_add(size).min(position.page_count.saturating_sub(1));
    (start..=end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const PAGES: usize = 500;

    fn controller(config: FlowConfig) -> (AdaptiveFlowController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let flow = AdaptiveFlowController::with_clock(config, clock.clone()).unwrap();
        (flow, clock)
    }

    /// Turn pages `pages` at a fixed interval
    fn read(
        flow: &AdaptiveFlowController,
        clock: &ManualClock,
        pages: std::ops::Range<usize>,
        every: Duration,
    ) {
        for page in pages {
            clock.advance(every);
            flow.track_page_change(page, PAGES);
        }
    }

    fn jank(flow: &AdaptiveFlowController, frames: usize) {
        for _ in 0..frames {
            flow.update_frame_metrics(80.0);
        }
    }

    fn set(pages: std::ops::RangeInclusive<usize>) -> BTreeSet<usize> {
        pages.collect()
    }

    #[test]
    fn test_initial_outputs_are_baseline() {
        let (flow, _) = controller(FlowConfig::default());
        assert_eq!(flow.snapshot(), FlowSnapshot::default());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = FlowConfig::default().with_preload_range(4, 1);
        assert!(AdaptiveFlowController::new(config).is_err());
    }

    #[test]
    fn test_speed_converges_to_cadence() {
        let (flow, clock) = controller(FlowConfig::default());

        for (seconds, expected) in [(6u64, 10.0), (2, 30.0)] {
            flow.reset();
            read(&flow, &clock, 0..40, Duration::from_secs(seconds));
            let speed = flow.reading_speed_pages_per_minute();
            assert!((speed - expected).abs() < 0.01, "{} s/page gave {}", seconds, speed);
        }
    }

    #[test]
    fn test_targets_follow_position_and_speed() {
        let (flow, clock) = controller(FlowConfig::default());

        // First page: no speed yet, minimum lookahead
        flow.track_page_change(10, PAGES);
        assert_eq!(flow.preload_targets(), set(11..=11));

        // 30 ppm: min 1 + 3 extra pages
        read(&flow, &clock, 11..20, Duration::from_secs(2));
        assert_eq!(flow.preload_targets(), set(20..=23));

        // 120 ppm hits the cap
        read(&flow, &clock, 20..60, Duration::from_millis(500));
        assert_eq!(flow.preload_targets(), set(60..=67));
    }

    #[test]
    fn test_targets_are_clamped_to_document() {
        let (flow, clock) = controller(FlowConfig::default());
        for page in 0..12 {
            clock.advance(Duration::from_millis(500));
            flow.track_page_change(page, 14);
        }
        assert_eq!(flow.preload_targets(), set(12..=13));

        clock.advance(Duration::from_millis(500));
        flow.track_page_change(13, 14);
        assert!(flow.preload_targets().is_empty());
    }

    #[test]
    fn test_out_of_range_page_is_ignored() {
        let (flow, _) = controller(FlowConfig::default());
        flow.track_page_change(3, 10);
        let before = flow.snapshot();

        flow.track_page_change(10, 10);
        flow.track_page_change(0, 0);
        assert_eq!(flow.snapshot(), before);
    }

    #[test]
    fn test_single_frame_outlier_does_not_trigger_load() {
        let (flow, _) = controller(FlowConfig::default());
        flow.track_page_change(0, PAGES);

        for _ in 0..10 {
            flow.update_frame_metrics(16.0);
        }
        flow.update_frame_metrics(950.0);
        flow.update_frame_metrics(16.0);

        assert!(!flow.is_ui_under_load());
        assert!(!flow.preload_targets().is_empty());
    }

    #[test]
    fn test_invalid_frames_are_discarded() {
        let (flow, _) = controller(FlowConfig::default());
        flow.update_frame_metrics(16.0);
        for bad in [f64::NAN, -1.0, 0.0, 60_000.0] {
            flow.update_frame_metrics(bad);
        }
        assert_eq!(flow.frame_interval_millis(), 16.0);
        assert!(!flow.is_ui_under_load());
    }

    #[test]
    fn test_sustained_jank_clears_targets_until_cooldown_and_page_change() {
        let config = FlowConfig::default();
        let cooldown = config.cooldown();
        let (flow, clock) = controller(config);
        read(&flow, &clock, 0..5, Duration::from_secs(3));
        assert!(!flow.preload_targets().is_empty());

        jank(&flow, 5);
        assert!(flow.is_ui_under_load());
        assert!(flow.preload_targets().is_empty());

        // Page change before the cooldown: still suppressed
        clock.advance(cooldown / 2);
        flow.track_page_change(5, PAGES);
        assert!(flow.is_ui_under_load());
        assert!(flow.preload_targets().is_empty());

        // Cooldown elapsed but no page change yet: still suppressed
        clock.advance(cooldown);
        flow.update_frame_metrics(16.0);
        flow.on_sensor_changed(TiltSample::from_pitch_degrees(80.0));
        assert!(flow.is_ui_under_load());
        assert!(flow.preload_targets().is_empty());

        flow.track_page_change(6, PAGES);
        assert!(!flow.is_ui_under_load());
        assert!(flow.preload_targets().contains(&7));
    }

    #[test]
    fn test_continued_jank_extends_cooldown() {
        let config = FlowConfig::default();
        let cooldown = config.cooldown();
        let (flow, clock) = controller(config);
        flow.track_page_change(0, PAGES);

        jank(&flow, 5);
        clock.advance(cooldown - Duration::from_millis(100));
        jank(&flow, 1);
        clock.advance(Duration::from_millis(200));

        flow.track_page_change(1, PAGES);
        assert!(flow.is_ui_under_load(), "recent jank must restart the cooldown");

        clock.advance(cooldown);
        flow.track_page_change(2, PAGES);
        assert!(!flow.is_ui_under_load());
    }

    #[test]
    fn test_recovery_needs_a_new_run_of_jank() {
        let config = FlowConfig::default();
        let cooldown = config.cooldown();
        let needed = config.min_consecutive_jank_samples;
        let (flow, clock) = controller(config);
        flow.track_page_change(0, PAGES);

        jank(&flow, needed);
        clock.advance(cooldown);
        flow.track_page_change(1, PAGES);
        assert!(!flow.is_ui_under_load());

        jank(&flow, needed - 1);
        assert!(!flow.is_ui_under_load());
        jank(&flow, 1);
        assert!(flow.is_ui_under_load());
    }

    #[test]
    fn test_tilt_raises_sensitivity_and_widens_targets() {
        let (flow, clock) = controller(FlowConfig {
            tilt_smoothing: 1.0,
            ..FlowConfig::default()
        });
        read(&flow, &clock, 0..10, Duration::from_secs(3));
        let before = flow.preload_targets();
        assert_eq!(flow.swipe_sensitivity(), 1.0);

        flow.on_sensor_changed(TiltSample::new(0.0, 9.81, 0.0));
        assert_eq!(flow.swipe_sensitivity(), 2.0);

        let after = flow.preload_targets();
        assert_eq!(after.len(), before.len() + 2);
        assert!(after.is_superset(&before));
    }

    #[test]
    fn test_preload_size_saturates_at_maximum() {
        let config = FlowConfig {
            min_preload_pages: usize::MAX,
            tilt_extra_pages: usize::MAX,
            ..FlowConfig::default()
        };
        assert_eq!(preload_size(f64::MAX, 1.0, &config), config.max_preload_pages);
        assert_eq!(preload_size(30.0, 1.0, &config), config.max_preload_pages);
    }

    #[test]
    fn test_full_tilt_at_largest_bonus_stays_usable() {
        let (flow, clock) = controller(FlowConfig {
            tilt_smoothing: 1.0,
            tilt_extra_pages: 8,
            max_preload_pages: 8,
            ..FlowConfig::default()
        });
        read(&flow, &clock, 0..5, Duration::from_secs(3));
        flow.on_sensor_changed(TiltSample::new(0.0, 9.81, 0.0));
        assert_eq!(flow.preload_targets(), set(5..=12));

        // The controller keeps working afterwards
        clock.advance(Duration::from_secs(3));
        flow.track_page_change(5, PAGES);
        assert_eq!(flow.preload_targets(), set(6..=13));
    }

    #[test]
    fn test_tilt_without_reading_keeps_minimum_window() {
        let (flow, _) = controller(FlowConfig {
            tilt_smoothing: 1.0,
            ..FlowConfig::default()
        });
        flow.track_page_change(4, PAGES);
        flow.on_sensor_changed(TiltSample::new(0.0, 9.81, 0.0));
        assert_eq!(flow.preload_targets(), set(5..=5));
        assert_eq!(flow.swipe_sensitivity(), 2.0);
    }

    #[test]
    fn test_garbage_sensor_sample_is_ignored() {
        let (flow, _) = controller(FlowConfig::default());
        flow.on_sensor_changed(TiltSample::new(f32::NAN, 0.0, 0.0));
        flow.on_sensor_changed(TiltSample::new(0.0, 0.0, 0.0));
        assert_eq!(flow.swipe_sensitivity(), 1.0);
    }

    #[test]
    fn test_reset_returns_to_baseline() {
        let (flow, clock) = controller(FlowConfig::default());
        read(&flow, &clock, 0..10, Duration::from_secs(1));
        flow.on_sensor_changed(TiltSample::new(0.0, 9.81, 0.0));
        jank(&flow, 5);
        assert!(flow.is_ui_under_load());

        flow.reset();
        assert_eq!(flow.snapshot(), FlowSnapshot::default());

        // Fresh state: the first page change computes targets immediately
        flow.track_page_change(20, PAGES);
        assert_eq!(flow.preload_targets(), set(21..=21));
    }

    #[test]
    fn test_streams_replace_on_change() {
        let (flow, clock) = controller(FlowConfig::default());
        let mut under_load = flow.subscribe_ui_under_load();
        let targets = flow.subscribe_preload_targets();

        read(&flow, &clock, 0..3, Duration::from_secs(6));
        assert_eq!(*targets.borrow(), set(3..=4));

        jank(&flow, 5);
        assert!(under_load.has_changed().unwrap());
        assert!(*under_load.borrow_and_update());
        assert!(targets.borrow().is_empty());

        // More jank does not produce another notification
        jank(&flow, 3);
        assert!(!under_load.has_changed().unwrap());

        let late = flow.subscribe_reading_speed();
        assert!((*late.borrow() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_updates() {
        let (flow, clock) = controller(FlowConfig::default());
        let flow = Arc::new(flow);

        let handles: Vec<_> = (0..3)
            .map(|kind| {
                let flow = flow.clone();
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        match kind {
                            0 => {
                                clock.advance(Duration::from_millis(500));
                                flow.track_page_change(i, PAGES);
                            }
                            1 => flow.update_frame_metrics(16.0),
                            _ => flow.on_sensor_changed(TiltSample::from_pitch_degrees(40.0)),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = flow.snapshot();
        assert!(!snapshot.ui_under_load);
        assert_eq!(snapshot.frame_interval_millis, 16.0);
        assert!(snapshot.reading_speed_pages_per_minute > 0.0);
        assert!(snapshot.preload_targets.contains(&200));
    }
}
