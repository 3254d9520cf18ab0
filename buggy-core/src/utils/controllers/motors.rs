//! Motor drive for the seeker buggy.
//!
//! `DriveTrain` turns a normalized two-channel `VelocityCommand` into forward
//! or reverse duty on two independent `MotorOutput`s. `Pca9685Motor` is the
//! `MotorOutput` used on the buggy: the two inputs of one H-bridge wired to a
//! pair of PCA9685 channels on a shared I2C bus.

use core::cell::RefCell;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};
use serde::{Deserialize, Serialize};

/// Internal oscillator of the PCA9685 (Hz).
const PCA9685_OSC_HZ: f32 = 25_000_000.0;
/// Counter resolution of a PCA9685 channel.
const MAX_DUTY: u16 = 4095;

/// Signed normalized duty for the left and right motors.
///
/// Each component must lie in `[-1.0, 1.0]`; negative values run the motor in
/// reverse. Note the left motor is mounted mirrored, so driving straight ahead
/// uses a negative left and a positive right component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub left: f32,
    pub right: f32,
}

impl VelocityCommand {
    pub const STOP: Self = Self::new(0.0, 0.0);

    pub const fn new(
        left: f32,
        right: f32,
    ) -> Self {
        Self { left, right }
    }

    /// Check both components, left first. NaN is out of range.
    pub fn validate(&self) -> Result<(), RangeError> {
        if !(-1.0..=1.0).contains(&self.left) {
            return Err(RangeError::LeftOutOfRange);
        }
        if !(-1.0..=1.0).contains(&self.right) {
            return Err(RangeError::RightOutOfRange);
        }
        Ok(())
    }
}

/// A velocity component outside `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    LeftOutOfRange,
    RightOutOfRange,
}

/// Errors returned by `DriveTrain`.
#[derive(Debug, PartialEq)]
pub enum DriveError<E: core::fmt::Debug> {
    /// Command rejected; neither motor was touched.
    Range(RangeError),
    /// The motor output failed while applying the command.
    Motor(E),
}

/// One motor channel: an H-bridge driven by PWM.
pub trait MotorOutput {
    type Error: core::fmt::Debug;

    /// Configure the PWM carrier period.
    fn set_period_ms(
        &mut self,
        period_ms: u32,
    ) -> Result<(), Self::Error>;

    /// Run forward with `duty` in `[0.0, 1.0]`.
    fn set_forward(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error>;

    /// Run in reverse with `duty` in `[0.0, 1.0]`.
    fn set_reverse(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error>;
}

/// Anything that accepts velocity commands.
pub trait Drive {
    type Error: core::fmt::Debug;

    fn drive(
        &mut self,
        cmd: VelocityCommand,
    ) -> Result<(), DriveError<Self::Error>>;

    fn stop(&mut self) -> Result<(), DriveError<Self::Error>> {
        self.drive(VelocityCommand::STOP)
    }
}

/// Linear acceleration profile for `DriveTrain::ramp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ramp {
    pub start: f32,
    pub end: f32,
    pub step: f32,
    /// Time spent at each intermediate duty (ms).
    pub dwell_ms: u32,
}

impl Default for Ramp {
    fn default() -> Self {
        Self {
            start: 0.5,
            end: 1.0,
            step: 0.01,
            dwell_ms: 100,
        }
    }
}

/// Left and right motors behind range validation.
pub struct DriveTrain<L, R> {
    left: L,
    right: R,
    last: VelocityCommand,
}

impl<L, R, E> DriveTrain<L, R>
where
    L: MotorOutput<Error = E>,
    R: MotorOutput<Error = E>,
    E: core::fmt::Debug,
{
    /// Configure the carrier period on both motors once and make sure they are stopped.
    pub fn new(
        mut left: L,
        mut right: R,
        period_ms: u32,
    ) -> Result<Self, E> {
        left.set_period_ms(period_ms)?;
        right.set_period_ms(period_ms)?;
        left.set_forward(0.0)?;
        right.set_forward(0.0)?;
        tracing::info!(period_ms, "drive train ready");

        Ok(Self {
            left,
            right,
            last: VelocityCommand::STOP,
        })
    }

    /// What the motors were last set to, channel by channel.
    pub fn last_command(&self) -> VelocityCommand {
        self.last
    }

    /// Accelerate both motors along `ramp`, holding each step for `dwell_ms`.
    ///
    /// Both channels get the same duty, so with the mirrored left motor this
    /// spins the buggy on the spot. The ramp may also run downwards.
    pub fn ramp<D: DelayNs>(
        &mut self,
        delay: &mut D,
        ramp: Ramp,
    ) -> Result<(), DriveError<E>> {
        let span = ramp.end - ramp.start;
        let steps = if ramp.step > 0.0 {
            libm::roundf(span.abs() / ramp.step) as u32
        } else {
            0
        };
        if steps == 0 {
            self.drive(VelocityCommand::new(ramp.end, ramp.end))?;
            delay.delay_ms(ramp.dwell_ms);
            return Ok(());
        }
        for i in 0..=steps {
            let duty = ramp.start + span * (i as f32 / steps as f32);
            self.drive(VelocityCommand::new(duty, duty))?;
            delay.delay_ms(ramp.dwell_ms);
        }
        Ok(())
    }

    pub fn release(self) -> (L, R) {
        (self.left, self.right)
    }
}

impl<L, R, E> Drive for DriveTrain<L, R>
where
    L: MotorOutput<Error = E>,
    R: MotorOutput<Error = E>,
    E: core::fmt::Debug,
{
    type Error = E;

    /// Validate the whole command, then apply it channel by channel.
    fn drive(
        &mut self,
        cmd: VelocityCommand,
    ) -> Result<(), DriveError<E>> {
        if let Err(e) = cmd.validate() {
            tracing::warn!(left = cmd.left, right = cmd.right, error = ?e, "velocity command rejected");
            return Err(DriveError::Range(e));
        }

        // `last` follows each channel as it is applied, so a failure on the
        // right motor still records the left one.
        apply(&mut self.left, cmd.left).map_err(DriveError::Motor)?;
        self.last.left = cmd.left;
        apply(&mut self.right, cmd.right).map_err(DriveError::Motor)?;
        self.last.right = cmd.right;
        tracing::trace!(left = cmd.left, right = cmd.right, "velocity applied");
        Ok(())
    }
}

fn apply<M: MotorOutput>(
    motor: &mut M,
    speed: f32,
) -> Result<(), M::Error> {
    if speed < 0.0 {
        motor.set_reverse(-speed)
    } else {
        motor.set_forward(speed)
    }
}

/// Errors that can occur when driving a motor through the PCA9685.
#[derive(Debug)]
pub enum MotorError<E: core::fmt::Debug> {
    PwmError(PwmError<E>),
    /// Requested carrier period is outside what the prescaler can produce.
    InvalidPeriod(u32),
}

/// An H-bridge whose two inputs are PCA9685 channels.
pub struct Pca9685Motor<'a, I2C: 'static> {
    pwm: Pca9685<RefCellDevice<'a, I2C>>,
    forward: Channel,
    reverse: Channel,
}

impl<'a, I2C, E> Pca9685Motor<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Attach to the PCA9685 at `address` on a shared bus.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        address: u8,
        forward: Channel,
        reverse: Channel,
    ) -> Result<Self, MotorError<E>> {
        let pwm = Pca9685::new(RefCellDevice::new(i2c_bus), PwmAddress::from(address))
            .map_err(MotorError::PwmError)?;
        Ok(Self {
            pwm,
            forward,
            reverse,
        })
    }

    /// Drive the two bridge inputs. The input being released is written
    /// first, so both are never high together.
    fn set_inputs(
        &mut self,
        forward: f32,
        reverse: f32,
    ) -> Result<(), MotorError<E>> {
        let (first, second) = if forward > 0.0 {
            ((self.reverse, reverse), (self.forward, forward))
        } else {
            ((self.forward, forward), (self.reverse, reverse))
        };
        for (channel, duty) in [first, second] {
            self.pwm
                .set_channel_on_off(channel, 0, duty_ticks(duty))
                .map_err(MotorError::PwmError)?;
        }
        Ok(())
    }
}

impl<I2C, E> MotorOutput for Pca9685Motor<'_, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    type Error = MotorError<E>;

    /// Wake the chip and program the prescaler for the requested period.
    fn set_period_ms(
        &mut self,
        period_ms: u32,
    ) -> Result<(), Self::Error> {
        let prescale = prescale_for_period(period_ms).ok_or(MotorError::InvalidPeriod(period_ms))?;
        self.pwm.enable().map_err(MotorError::PwmError)?;
        self.pwm
            .set_prescale(prescale)
            .map_err(MotorError::PwmError)?;
        tracing::debug!(period_ms, prescale, "PCA9685 prescale set");
        Ok(())
    }

    fn set_forward(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error> {
        self.set_inputs(duty, 0.0)
    }

    fn set_reverse(
        &mut self,
        duty: f32,
    ) -> Result<(), Self::Error> {
        self.set_inputs(0.0, duty)
    }
}

/// PCA9685 prescale value for a carrier period, if it is representable.
pub fn prescale_for_period(period_ms: u32) -> Option<u8> {
    if period_ms == 0 {
        return None;
    }
    let freq_hz = 1000.0 / period_ms as f32;
    let prescale = libm::roundf(PCA9685_OSC_HZ / (4096.0 * freq_hz)) - 1.0;
    if (3.0..=255.0).contains(&prescale) {
        Some(prescale as u8)
    } else {
        None
    }
}

/// Convert a duty fraction into PCA9685 off-counts.
pub fn duty_ticks(duty: f32) -> u16 {
    (duty.clamp(0.0, 1.0) * MAX_DUTY as f32) as u16
}
