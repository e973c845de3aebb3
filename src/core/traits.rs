//! Collaborator traits.
//!
//! The engine does not touch hardware. Physical controls and the status
//! display are reached through these traits so the same engine runs on a
//! device, on a desktop, and under test.

use crate::control::StatusSnapshot;

/// Logical identity of a physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    /// Select the next locomotive in the roster.
    NextLoco,
    /// Select the previous locomotive in the roster.
    PreviousLoco,
    /// Reverse the direction of travel.
    Direction,
    /// Stop the selected locomotive.
    EmergencyStop,
    /// Toggle the locomotive lights (function 0).
    Light,
    /// Toggle the locomotive sound (function 1).
    Sound,
}

/// One reading of the physical controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSample {
    /// Buttons pressed since the previous sample (debounced press edges).
    pub pressed: Vec<Button>,
    /// Raw speed dial reading, before calibration.
    pub raw_speed: u16,
}

/// Source of debounced button edges and raw dial readings.
///
/// Implementations own pin setup, ADC sampling and debouncing.
pub trait InputProvider {
    /// Take one sample of the controls.
    fn sample(&mut self) -> InputSample;
}

/// Consumer of status snapshots, typically an LED driver.
pub trait StatusSink {
    /// Show the given snapshot. Called only when the snapshot changed.
    fn publish(&mut self, snapshot: &StatusSnapshot);
}

impl<F> StatusSink for F
where
    F: FnMut(&StatusSnapshot),
{
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        self(snapshot)
    }
}
