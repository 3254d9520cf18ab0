//! Module Exports
//!
//! This file exports the drivers and the behavior state machine of the buggy.
//!
//! - `ultrasonic`: time-of-flight ranging with bounded echo waits.
//! - `motors`: velocity commands, range validation and the PCA9685 motor
//!   outputs.
//! - `reflectance`: the single pixel camera (LDR under coloured LEDs).
//! - `behavior`: search, approach and classify.

pub mod behavior;
/// Module for driving the two motors.
pub mod motors;
pub mod reflectance;
pub mod ultrasonic;

pub use behavior::{classify, BehaviorController, BehaviorState, RunOutcome};
pub use motors::{Drive, DriveError, DriveTrain, MotorOutput, Pca9685Motor, RangeError, VelocityCommand};
pub use reflectance::{AnalogInput, Illumination, ReflectanceSample, ReflectanceSensor, Reflectometer};
pub use ultrasonic::{DistanceSample, DistanceSensor, InstantTimer, MicrosTimer, Ultrasonic};
