//! Serial telemetry for the seeker buggy.
//!
//! Every event renders to the exact text line the serial monitor tooling
//! expects. Integer distances are truncated toward zero, voltages use two
//! decimals.
//!
//! # Modules
//! - `sink`: destinations for telemetry events.

pub mod sink;

use core::fmt;

use serde::{Deserialize, Serialize};

pub use sink::{ChannelSink, FmtSink, TelemetrySink, TELEMETRY_CHANNEL};

use crate::utils::controllers::reflectance::Illumination;

/// Result of classifying the paper in front of the buggy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperColour {
    Blue,
    Red,
}

impl PaperColour {
    /// LED that signals this colour.
    pub fn lamp(self) -> Illumination {
        match self {
            PaperColour::Blue => Illumination::Blue,
            PaperColour::Red => Illumination::Red,
        }
    }
}

/// Telemetry events.
///
/// Serialized as JSON with tag `"ev"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ev", rename_all = "snake_case")]
pub enum Telemetry {
    /// Sample taken while searching.
    ObjectDistance { mm: i32 },
    /// Sample taken while approaching.
    ArrivalDistance { mm: i32 },
    /// Search finished.
    ObjectFound,
    /// Offset-corrected direct reading.
    Range { mm: i32 },
    /// Reached the object. Has no serial line; cues the arrival tune.
    Arrived,
    /// LDR voltage under one illumination.
    Ldr { channel: Illumination, volts: f32 },
    Paper { colour: PaperColour },
}

impl fmt::Display for Telemetry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Telemetry::ObjectDistance { mm } => writeln!(f, "Object Distance: {mm}mm"),
            Telemetry::ArrivalDistance { mm } => writeln!(f, "Arrival Distance: {mm}mm"),
            Telemetry::ObjectFound => f.write_str("\nObject found, stopped, now moving to object."),
            Telemetry::Range { mm } => writeln!(f, "{mm}mm "),
            Telemetry::Arrived => Ok(()),
            Telemetry::Ldr { channel, volts } => {
                let name = match channel {
                    Illumination::Red => "RED",
                    Illumination::Green => "GREEN",
                    Illumination::Blue => "BLUE",
                };
                writeln!(f, "\n{name} LDR {volts:4.2}V")
            }
            Telemetry::Paper {
                colour: PaperColour::Blue,
            } => f.write_str("\nThe paper is blue."),
            Telemetry::Paper {
                colour: PaperColour::Red,
            } => f.write_str("\nThe paper is red."),
        }
    }
}
