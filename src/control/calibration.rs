//! Speed dial calibration.

use std::collections::VecDeque;

use crate::core::constants::{DEFAULT_CALIBRATION_MAX, DEFAULT_CALIBRATION_MIN, MAX_SPEED};
use crate::core::ConfigError;

/// Linear map from a measured raw sub-range onto 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    min: u16,
    max: u16,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            min: DEFAULT_CALIBRATION_MIN,
            max: DEFAULT_CALIBRATION_MAX,
        }
    }
}

impl Calibration {
    /// Create a calibration. `min` must be below `max`.
    pub fn new(min: u16, max: u16) -> Result<Self, ConfigError> {
        if min >= max {
            return Err(ConfigError::InvalidCalibration { min, max });
        }
        Ok(Self { min, max })
    }

    /// Raw reading mapped to 0.
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Raw reading mapped to 100.
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Map a raw reading to 0..=100, rounding to nearest and clamping
    /// outside the range.
    pub fn apply(&self, raw: u16) -> u8 {
        let raw = raw.clamp(self.min, self.max);
        let span = u32::from(self.max - self.min);
        let offset = u32::from(raw - self.min);
        let scaled = (offset * u32::from(MAX_SPEED) + span / 2) / span;
        u8::try_from(scaled).unwrap_or(MAX_SPEED)
    }
}

/// Moving average over the last few raw readings.
#[derive(Debug, Clone)]
pub struct SmoothedDial {
    calibration: Calibration,
    window: usize,
    samples: VecDeque<u16>,
}

impl SmoothedDial {
    /// Average over `window` samples (at least one).
    pub fn new(calibration: Calibration, window: usize) -> Self {
        let window = window.max(1);
        Self {
            calibration,
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Add a raw reading and return the calibrated, smoothed speed.
    pub fn push(&mut self, raw: u16) -> u8 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(raw);

        let sum: u32 = self.samples.iter().map(|&s| u32::from(s)).sum();
        let count = self.samples.len() as u32;
        let mean = u16::try_from((sum + count / 2) / count).unwrap_or(u16::MAX);
        self.calibration.apply(mean)
    }

    /// Forget previous readings.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
