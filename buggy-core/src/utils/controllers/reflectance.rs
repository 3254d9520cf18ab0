//! Single pixel camera for the seeker buggy.
//!
//! A light dependent resistor on an analog input, lit by one of three coloured
//! LEDs at a time. The same LEDs double as the feedback lamp once the paper has
//! been classified.

use embedded_hal::{delay::DelayNs, digital::OutputPin};
use serde::{Deserialize, Serialize};

use crate::utils::config::ReflectanceSettings;

/// Illumination colour, in LED index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Illumination {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl Illumination {
    pub const ALL: [Illumination; 3] = [Illumination::Red, Illumination::Green, Illumination::Blue];

    fn index(self) -> usize {
        self as usize
    }
}

/// An LDR voltage read under a known illumination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectanceSample {
    pub voltage: f32,
    pub channel: Illumination,
}

/// Analog input sampled as a fraction of full scale.
pub trait AnalogInput {
    type Error: core::fmt::Debug;

    /// Returns a value in `[0.0, 1.0]`.
    fn read_fraction(&mut self) -> Result<f32, Self::Error>;
}

/// Errors raised by the reflectance reader.
#[derive(Debug, PartialEq)]
pub enum ReflectanceError<P, A> {
    Led(P),
    Adc(A),
}

/// Anything that can read surface reflectance and show a colour.
pub trait ReflectanceSensor {
    type Error: core::fmt::Debug;

    fn read_under(
        &mut self,
        channel: Illumination,
    ) -> Result<ReflectanceSample, Self::Error>;

    fn all_off(&mut self) -> Result<(), Self::Error>;

    /// Blank all LEDs for `off_ms`, then show `channel` for `on_ms`.
    fn feedback(
        &mut self,
        channel: Illumination,
        off_ms: u32,
        on_ms: u32,
    ) -> Result<(), Self::Error>;
}

/// LDR plus red, green and blue illumination LEDs.
pub struct Reflectometer<P, A, D> {
    leds: [P; 3],
    ldr: A,
    delay: D,
    settings: ReflectanceSettings,
}

impl<P, A, D> Reflectometer<P, A, D>
where
    P: OutputPin,
    A: AnalogInput,
    D: DelayNs,
{
    /// Take the LEDs in red, green, blue order.
    pub fn new(
        leds: [P; 3],
        ldr: A,
        delay: D,
        settings: ReflectanceSettings,
    ) -> Self {
        Self {
            leds,
            ldr,
            delay,
            settings,
        }
    }

    /// Light `channel` only, or nothing for `None`.
    ///
    /// The other LEDs are switched off before the selected one comes on, so two
    /// colours are never lit together.
    pub fn illuminate(
        &mut self,
        channel: Option<Illumination>,
    ) -> Result<(), ReflectanceError<P::Error, A::Error>> {
        let lit = channel.map(Illumination::index);
        for (i, led) in self.leds.iter_mut().enumerate() {
            if Some(i) != lit {
                led.set_low().map_err(ReflectanceError::Led)?;
            }
        }
        if let Some(i) = lit {
            self.leds[i].set_high().map_err(ReflectanceError::Led)?;
        }
        Ok(())
    }

    /// Convert a full-scale fraction into the calibrated voltage for `channel`.
    pub fn scale(
        &self,
        fraction: f32,
        channel: Illumination,
    ) -> f32 {
        fraction * self.settings.reference_v / self.settings.divisors[channel.index()]
    }

    pub fn release(self) -> ([P; 3], A, D) {
        (self.leds, self.ldr, self.delay)
    }
}

impl<P, A, D> ReflectanceSensor for Reflectometer<P, A, D>
where
    P: OutputPin,
    A: AnalogInput,
    D: DelayNs,
{
    type Error = ReflectanceError<P::Error, A::Error>;

    /// Illuminate, let the LDR settle, then sample.
    fn read_under(
        &mut self,
        channel: Illumination,
    ) -> Result<ReflectanceSample, Self::Error> {
        self.illuminate(Some(channel))?;
        self.delay.delay_ms(self.settings.settle_ms);
        let fraction = self.ldr.read_fraction().map_err(ReflectanceError::Adc)?;
        let voltage = self.scale(fraction, channel);
        tracing::debug!(?channel, fraction, voltage, "reflectance sampled");

        Ok(ReflectanceSample { voltage, channel })
    }

    fn all_off(&mut self) -> Result<(), Self::Error> {
        self.illuminate(None)
    }

    fn feedback(
        &mut self,
        channel: Illumination,
        off_ms: u32,
        on_ms: u32,
    ) -> Result<(), Self::Error> {
        self.illuminate(None)?;
        self.delay.delay_ms(off_ms);
        self.illuminate(Some(channel))?;
        self.delay.delay_ms(on_ms);
        self.illuminate(None)
    }
}
