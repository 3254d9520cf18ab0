//! Ultrasonic time-of-flight ranging.
//!
//! One `measure()` call fires a trigger pulse, times the echo pulse with a
//! microsecond timer and converts its width to millimetres. Both edge waits run
//! against one deadline from the trigger, so a measurement never takes longer
//! than the timeout window, echo or not.

use embassy_time::Instant;
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::utils::{
    config::RangerSettings,
    telemetry::{Telemetry, TelemetrySink},
};

/// A single ranging result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSample {
    pub distance_mm: f32,
    /// `false` when the echo timed out.
    pub valid: bool,
}

impl DistanceSample {
    pub fn valid(distance_mm: f32) -> Self {
        Self {
            distance_mm,
            valid: true,
        }
    }

    /// A timed out measurement reporting `distance_mm` as its nominal range.
    pub fn timeout(distance_mm: f32) -> Self {
        Self {
            distance_mm,
            valid: false,
        }
    }

    /// Distance to decide on: a timed out sample means nothing is in range.
    pub fn effective_mm(&self) -> f32 {
        if self.valid {
            self.distance_mm
        } else {
            f32::INFINITY
        }
    }
}

/// Source of distance samples.
pub trait DistanceSensor {
    fn measure(&mut self) -> DistanceSample;
}

/// Free-running microsecond timer owned by the ranger.
pub trait MicrosTimer {
    /// Restart counting from zero.
    fn reset(&mut self);

    /// Microseconds since the last reset.
    fn elapsed_us(&mut self) -> u32;
}

/// `MicrosTimer` on top of the embassy time driver.
pub struct InstantTimer {
    origin: Instant,
}

impl InstantTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for InstantTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosTimer for InstantTimer {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn elapsed_us(&mut self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

/// Why an echo edge was not observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoError<E> {
    /// The edge did not arrive within the timeout window.
    Timeout,
    /// Reading or driving a pin failed.
    Pin(E),
}

/// Poll `is_high` until it reports `level`, or until `timeout_us` have passed
/// since `since_us` on `timer`.
///
/// Returns the timer value at which the level was first seen.
pub fn wait_for_level<T, F, E>(
    timer: &mut T,
    mut is_high: F,
    level: bool,
    since_us: u32,
    timeout_us: u32,
) -> Result<u32, EchoError<E>>
where
    T: MicrosTimer,
    F: FnMut() -> Result<bool, E>,
{
    loop {
        let high = is_high().map_err(EchoError::Pin)?;
        let now = timer.elapsed_us();
        if high == level {
            return Ok(now);
        }
        if now.saturating_sub(since_us) >= timeout_us {
            return Err(EchoError::Timeout);
        }
    }
}

/// Trigger/echo ultrasonic ranger (HC-SR04 style).
pub struct Ultrasonic<TRIG, ECHO, TIMER, D> {
    trigger: TRIG,
    echo: ECHO,
    timer: TIMER,
    delay: D,
    settings: RangerSettings,
}

impl<TRIG, ECHO, TIMER, D, E> Ultrasonic<TRIG, ECHO, TIMER, D>
where
    TRIG: OutputPin<Error = E>,
    ECHO: InputPin<Error = E>,
    TIMER: MicrosTimer,
    D: DelayNs,
    E: core::fmt::Debug,
{
    pub fn new(
        trigger: TRIG,
        echo: ECHO,
        timer: TIMER,
        delay: D,
        settings: RangerSettings,
    ) -> Self {
        Self {
            trigger,
            echo,
            timer,
            delay,
            settings,
        }
    }

    pub fn settings(&self) -> &RangerSettings {
        &self.settings
    }

    /// Fire the trigger and return the echo pulse width in microseconds.
    pub fn time_echo(&mut self) -> Result<u32, EchoError<E>> {
        self.trigger.set_high().map_err(EchoError::Pin)?;
        self.delay.delay_us(self.settings.trigger_pulse_us);
        self.trigger.set_low().map_err(EchoError::Pin)?;

        self.timer.reset();
        let timeout_us = self.settings.timeout_us;
        let echo = &mut self.echo;

        // Both edges share one deadline from the reset, so a late echo that
        // never falls still ends within `timeout_us`.
        let start = wait_for_level(&mut self.timer, || echo.is_high(), true, 0, timeout_us)?;
        let end = wait_for_level(&mut self.timer, || echo.is_high(), false, 0, timeout_us)?;

        Ok(end.wrapping_sub(start))
    }

    /// Measure once and report the offset-corrected range on `sink`.
    pub fn report_calibrated<S: TelemetrySink>(
        &mut self,
        sink: &mut S,
    ) -> DistanceSample {
        let mut sample = self.measure();
        sample.distance_mm += self.settings.calibration_offset_mm;
        sink.emit(&Telemetry::Range {
            mm: sample.distance_mm as i32,
        });
        sample
    }

    pub fn release(self) -> (TRIG, ECHO, TIMER, D) {
        (self.trigger, self.echo, self.timer, self.delay)
    }
}

impl<TRIG, ECHO, TIMER, D, E> DistanceSensor for Ultrasonic<TRIG, ECHO, TIMER, D>
where
    TRIG: OutputPin<Error = E>,
    ECHO: InputPin<Error = E>,
    TIMER: MicrosTimer,
    D: DelayNs,
    E: core::fmt::Debug,
{
    fn measure(&mut self) -> DistanceSample {
        match self.time_echo() {
            Ok(width_us) => {
                let sample = DistanceSample::valid(width_us as f32 / self.settings.us_per_mm);
                tracing::debug!(width_us, distance_mm = sample.distance_mm, "echo received");
                sample
            }
            Err(EchoError::Timeout) => {
                tracing::debug!("echo timed out");
                DistanceSample::timeout(self.settings.out_of_range_mm())
            }
            Err(EchoError::Pin(e)) => {
                tracing::warn!(error = ?e, "ranger pin failure");
                DistanceSample::timeout(self.settings.out_of_range_mm())
            }
        }
    }
}
