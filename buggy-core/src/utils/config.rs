//! Tunable settings for the seeker buggy.
//!
//! Every default below is the value the buggy was calibrated with. Settings
//! can be overridden from JSON; missing fields keep their defaults.
//!
//! # Example
//! ```rust
//! use buggy_core::utils::config::BuggyConfig;
//! let cfg = BuggyConfig::from_json(br#"{ "behavior": { "search_radius_mm": 450.0 } }"#).unwrap();
//! assert_eq!(cfg.behavior.search_radius_mm, 450.0);
//! assert_eq!(cfg.behavior.samples_per_scan, 4);
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::controllers::motors::VelocityCommand;

/// Aggregate configuration for every component of the buggy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuggyConfig {
    pub ranger: RangerSettings,
    pub drive: DriveSettings,
    pub reflectance: ReflectanceSettings,
    pub behavior: BehaviorSettings,
}

impl BuggyConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Ultrasonic ranging parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangerSettings {
    /// Width of the trigger pulse (µs).
    pub trigger_pulse_us: u32,
    /// Ceiling for each echo edge wait (µs).
    pub timeout_us: u32,
    /// Echo pulse width per millimetre of range.
    pub us_per_mm: f32,
    /// Offset added to direct telemetry readings (mm).
    pub calibration_offset_mm: f32,
}

impl Default for RangerSettings {
    fn default() -> Self {
        Self {
            trigger_pulse_us: 100,
            timeout_us: 25_000,
            us_per_mm: 5.8,
            calibration_offset_mm: 5.0,
        }
    }
}

impl RangerSettings {
    /// Distance reported for a measurement that ran into the timeout.
    pub fn out_of_range_mm(&self) -> f32 {
        self.timeout_us as f32 / self.us_per_mm
    }
}

/// Motor PWM parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    /// PWM carrier period; 2 ms is a 500 Hz base frequency.
    pub period_ms: u32,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self { period_ms: 2 }
    }
}

/// Single pixel camera calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectanceSettings {
    /// Full scale voltage of the analog input.
    pub reference_v: f32,
    /// Per-channel divisors, indexed red, green, blue.
    pub divisors: [f32; 3],
    /// Time the LDR is given to stabilise under a new illumination (ms).
    pub settle_ms: u32,
}

impl Default for ReflectanceSettings {
    fn default() -> Self {
        Self {
            reference_v: 3.3,
            divisors: [1.61, 1.33, 1.50],
            settle_ms: 500,
        }
    }
}

/// Thresholds, motion commands and timings for the behavior state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorSettings {
    /// An object closer than this ends the search (mm).
    pub search_radius_mm: f32,
    /// Upper bound of the approach band (mm, exclusive).
    pub approach_far_mm: f32,
    /// Lower bound of the approach band (mm, inclusive).
    pub approach_near_mm: f32,
    /// Closer than this counts as arrived (mm).
    pub arrival_mm: f32,
    /// Consecutive samples per scan; the last one decides.
    pub samples_per_scan: u8,

    pub sweep: VelocityCommand,
    pub sweep_ms: u32,
    pub sweep_settle_ms: u32,

    pub approach: VelocityCommand,
    pub approach_burst_ms: u32,
    pub approach_settle_ms: u32,

    pub correction: VelocityCommand,
    pub correction_ms: u32,

    /// Blue readings below this are blue paper (V).
    pub colour_threshold_v: f32,
    pub blink_off_ms: u32,
    pub blink_on_ms: u32,
    /// Also read and report the red and green channels.
    pub diagnostic_channels: bool,

    /// Cap on controller iterations; `None` runs until done or cancelled.
    pub max_iterations: Option<u32>,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            search_radius_mm: 600.0,
            approach_far_mm: 500.0,
            approach_near_mm: 20.0,
            arrival_mm: 30.0,
            samples_per_scan: 4,
            sweep: VelocityCommand::new(0.0, 1.0),
            sweep_ms: 250,
            sweep_settle_ms: 500,
            approach: VelocityCommand::new(-0.8, 0.77),
            approach_burst_ms: 1000,
            approach_settle_ms: 100,
            correction: VelocityCommand::new(-0.75, 0.75),
            correction_ms: 500,
            colour_threshold_v: 1.45,
            blink_off_ms: 1000,
            blink_on_ms: 5000,
            diagnostic_channels: false,
            max_iterations: None,
        }
    }
}
