//! Device tilt to swipe sensitivity.
//!
//! Accelerometer readings are low-pass filtered to isolate gravity, turned
//! into a pitch angle, and compared with a comfortable reading posture.
//! Tilting further away from it (beyond a dead zone) raises the swipe
//! sensitivity linearly up to a configured maximum.

use crate::config::FlowConfig;

/// Readings weaker than this (m/s²) carry no usable gravity direction
const MIN_GRAVITY_MAGNITUDE: f64 = 0.5;

/// One accelerometer reading in device coordinates (m/s²)
///
/// `x` points right, `y` points towards the top of the screen and `z` out of
/// the screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl TiltSample {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Sample for a device at rest pitched `degrees` up from lying flat
    pub fn from_pitch_degrees(degrees: f64) -> Self {
        const GRAVITY: f64 = 9.81;
        let radians = degrees.to_radians();
        Self {
            x: 0.0,
            y: (GRAVITY * radians.sin()) as f32,
            z: (GRAVITY * radians.cos()) as f32,
        }
    }
}

/// Result of a usable tilt sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TiltReading {
    pub(crate) pitch_degrees: f64,
    /// Tilt beyond the dead zone, 0.0 to 1.0
    pub(crate) intensity: f64,
    pub(crate) swipe_sensitivity: f64,
}

#[derive(Debug, Default)]
pub(crate) struct TiltFilter {
    gravity: Option<[f64; 3]>,
}

impl TiltFilter {
    /// Fold in a sample; `None` if it was discarded
    pub(crate) fn record(&mut self, sample: TiltSample, config: &FlowConfig) -> Option<TiltReading> {
        let raw = [sample.x as f64, sample.y as f64, sample.z as f64];
        if raw.iter().any(|axis| !axis.is_finite()) {
            return None;
        }
        let magnitude = raw.iter().map(|axis| axis * axis).sum::<f64>().sqrt();
        if magnitude < MIN_GRAVITY_MAGNITUDE {
            return None;
        }

        let alpha = config.tilt_smoothing;
        let gravity = match self.gravity {
            Some(previous) => [
                previous[0] + alpha * (raw[0] - previous[0]),
                previous[1] + alpha * (raw[1] - previous[1]),
                previous[2] + alpha * (raw[2] - previous[2]),
            ],
            None => raw,
        };
        self.gravity = Some(gravity);

        let [x, y, z] = gravity;
        let pitch_degrees = y.atan2(x.hypot(z)).to_degrees();
        let intensity = intensity(pitch_degrees, config);
        Some(TiltReading {
            pitch_degrees,
            intensity,
            swipe_sensitivity: 1.0 + intensity * (config.max_swipe_sensitivity - 1.0),
        })
    }

    pub(crate) fn reset(&mut self) {
        self.gravity = None;
    }
}

fn intensity(pitch_degrees: f64, config: &FlowConfig) -> f64 {
    let deviation = (pitch_degrees - config.neutral_pitch_degrees).abs();
    let beyond_dead_zone = (deviation - config.tilt_dead_zone_degrees).max(0.0);
    let span = config.max_tilt_degrees - config.tilt_dead_zone_degrees;
    (beyond_dead_zone / span).clamp(0.0, 1.0)
}
