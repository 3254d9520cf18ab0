//! Utility re-exports and helper macros for the seeker buggy.
//!
//! This module re-exports the drivers, the behavior controller and the
//! telemetry plumbing:
//!
//! - `config`: tunable settings with the buggy's calibrated defaults
//! - `controllers`: ultrasonic ranger, motor drive, reflectance reader and the
//!   search/approach/classify state machine
//! - `telemetry`: serial line protocol and sinks
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod controllers;
pub mod telemetry;

pub use config::BuggyConfig;
pub use controllers::BehaviorController;
pub use telemetry::{ChannelSink, FmtSink, Telemetry, TelemetrySink, TELEMETRY_CHANNEL};

#[doc(hidden)]
pub use static_cell::StaticCell;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::utils::StaticCell<$t> = $crate::utils::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
