//! Media clock utilities.
//!
//! Every timestamp that flows through a composition is a presentation time
//! in microseconds. This module provides utilities for:
//! - Clamping and applying a playback time-scale
//! - Generating synthetic frame timestamps
//! - Anchoring a run to wall-clock time
//! - Measuring drift between the audio and video tracks

use std::time::Instant;

use serde::{Deserialize, Serialize};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Playback speed factor. Values above 1 shorten the output.
///
/// Always clamped to `[TimeScale::MIN, TimeScale::MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct TimeScale(f64);

impl TimeScale {
    pub const MIN: f64 = 0.125;
    pub const MAX: f64 = 8.0;
    pub const NORMAL: TimeScale = TimeScale(1.0);

    /// Clamp a raw factor into the supported range. Non-finite input maps to
    /// normal speed.
    pub fn new(raw: f64) -> Self {
        if !raw.is_finite() {
            return Self::NORMAL;
        }
        Self(raw.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Map a source presentation time onto the output timeline.
    pub fn remap_us(self, source_us: i64) -> i64 {
        (source_us as f64 / self.0).round() as i64
    }

    /// Whether audio must be decoded and resampled rather than copied.
    pub fn requires_audio_remix(self) -> bool {
        self.0 >= 2.0
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<f64> for TimeScale {
    fn from(raw: f64) -> Self {
        Self::new(raw)
    }
}

impl From<TimeScale> for f64 {
    fn from(scale: TimeScale) -> Self {
        scale.0
    }
}

/// Presentation time of the `index`-th frame of a constant-rate stream.
pub fn frame_presentation_time_us(index: u64, frame_rate: u32) -> i64 {
    if frame_rate == 0 {
        return 0;
    }
    (index as i64 * MICROS_PER_SECOND) / frame_rate as i64
}

pub fn ms_to_us(ms: u64) -> i64 {
    ms as i64 * 1_000
}

pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / MICROS_PER_SECOND as f64
}

/// Clock for one composition run, anchored to the moment it started.
#[derive(Debug, Clone)]
pub struct RunClock {
    epoch: Instant,
    epoch_wall: String,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at run start (RFC 3339).
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Drift between the last written video and audio timestamps.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (µs).
    pub reference_us: i64,
    /// Timestamp in the measured stream (µs).
    pub measured_us: i64,
}

impl DriftMeasurement {
    /// Drift in microseconds (positive = measured is ahead).
    pub fn drift_us(&self) -> i64 {
        self.measured_us - self.reference_us
    }

    pub fn drift_ms(&self) -> f64 {
        self.drift_us() as f64 / 1_000.0
    }

    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
