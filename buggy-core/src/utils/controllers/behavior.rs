//! Search, approach and classify.
//!
//! `BehaviorController` sequences the ranger, the drive train and the single
//! pixel camera:
//!
//! ```text
//! Idle -> Searching -> Approaching -> Classifying -> Done
//! ```
//!
//! Each `step()` runs one iteration of the current state. Sensor failures never
//! abort the run: a timed out echo means "nothing in range" and the state
//! simply repeats on the next step.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use super::{
    motors::{Drive, VelocityCommand},
    reflectance::{Illumination, ReflectanceSensor},
    ultrasonic::{DistanceSample, DistanceSensor},
};
use crate::utils::{
    config::BehaviorSettings,
    telemetry::{PaperColour, Telemetry, TelemetrySink},
};

/// Controller state. Advances in declaration order and never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    Idle,
    Searching,
    Approaching,
    Classifying,
    Done,
}

/// How `BehaviorController::run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(PaperColour),
    Cancelled(BehaviorState),
    IterationLimit(BehaviorState),
}

/// Classify paper from the blue channel voltage.
///
/// Blue paper reflects less blue light than red paper does. A reading exactly
/// on the threshold counts as red.
pub fn classify(
    blue_voltage: f32,
    threshold_v: f32,
) -> PaperColour {
    if blue_voltage < threshold_v {
        PaperColour::Blue
    } else {
        PaperColour::Red
    }
}

pub struct BehaviorController<R, M, C, D, S> {
    ranger: R,
    drive: M,
    camera: C,
    delay: D,
    sink: S,
    settings: BehaviorSettings,
    state: BehaviorState,
    iterations: u32,
    last_sample: Option<DistanceSample>,
    colour: Option<PaperColour>,
}

impl<R, M, C, D, S> BehaviorController<R, M, C, D, S>
where
    R: DistanceSensor,
    M: Drive,
    C: ReflectanceSensor,
    D: DelayNs,
    S: TelemetrySink,
{
    pub fn new(
        ranger: R,
        drive: M,
        camera: C,
        delay: D,
        sink: S,
        settings: BehaviorSettings,
    ) -> Self {
        Self {
            ranger,
            drive,
            camera,
            delay,
            sink,
            settings,
            state: BehaviorState::Idle,
            iterations: 0,
            last_sample: None,
            colour: None,
        }
    }

    pub fn state(&self) -> BehaviorState {
        self.state
    }

    /// The sample the last transition check was made on.
    pub fn last_sample(&self) -> Option<DistanceSample> {
        self.last_sample
    }

    pub fn colour(&self) -> Option<PaperColour> {
        self.colour
    }

    /// Number of steps taken outside `Idle` and `Done`.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn settings(&self) -> &BehaviorSettings {
        &self.settings
    }

    /// The start signal: leave `Idle` and begin searching.
    pub fn start(&mut self) {
        if self.state == BehaviorState::Idle {
            tracing::info!("search started");
            self.state = BehaviorState::Searching;
        }
    }

    /// Run one iteration of the current state and return the resulting state.
    #[tracing::instrument(level = "debug", skip_all, fields(state = ?self.state))]
    pub fn step(&mut self) -> BehaviorState {
        match self.state {
            BehaviorState::Idle | BehaviorState::Done => return self.state,
            BehaviorState::Searching => self.search(),
            BehaviorState::Approaching => self.approach(),
            BehaviorState::Classifying => self.classify_paper(),
        }
        self.iterations += 1;
        self.state
    }

    /// Start and step until done, cancelled or out of iterations.
    ///
    /// `cancel` is checked before every step. On cancellation or when
    /// `max_iterations` is reached the motors are stopped.
    ///
    /// `run` does not return between steps, so with a `ChannelSink` the
    /// telemetry channel must be drained by a separate consumer meanwhile.
    /// Drive `step()` directly to forward events in between.
    pub fn run(
        &mut self,
        cancel: &AtomicBool,
    ) -> RunOutcome {
        self.start();
        loop {
            if let Some(colour) = self.colour.filter(|_| self.state == BehaviorState::Done) {
                return RunOutcome::Finished(colour);
            }
            if cancel.load(Ordering::Relaxed) {
                tracing::warn!(state = ?self.state, "run cancelled");
                self.halt();
                return RunOutcome::Cancelled(self.state);
            }
            if self
                .settings
                .max_iterations
                .is_some_and(|max| self.iterations >= max)
            {
                tracing::warn!(state = ?self.state, iterations = self.iterations, "iteration limit reached");
                self.halt();
                return RunOutcome::IterationLimit(self.state);
            }
            self.step();
        }
    }

    pub fn release(self) -> (R, M, C, D, S) {
        (self.ranger, self.drive, self.camera, self.delay, self.sink)
    }

    fn search(&mut self) {
        let sweep = self.settings.sweep;
        self.pulse(sweep, self.settings.sweep_ms);
        self.delay.delay_ms(self.settings.sweep_settle_ms);

        let sample = self.scan(|mm| Telemetry::ObjectDistance { mm });
        if sample.effective_mm() < self.settings.search_radius_mm {
            tracing::info!(distance_mm = sample.distance_mm, "object found");
            self.sink.emit(&Telemetry::ObjectFound);
            self.state = BehaviorState::Approaching;
        }
    }

    fn approach(&mut self) {
        let sample = self.scan(|mm| Telemetry::ArrivalDistance { mm });
        let d = sample.effective_mm();
        let s = self.settings;

        // The arrival and approach bands overlap on [near, arrival); the
        // close-range check runs first so that overlap counts as arrived.
        if d < s.arrival_mm {
            self.command(VelocityCommand::STOP);
            tracing::info!(distance_mm = d, "arrived at object");
            self.sink.emit(&Telemetry::Arrived);
            self.state = BehaviorState::Classifying;
        } else if (s.approach_near_mm..s.approach_far_mm).contains(&d) {
            self.pulse(s.approach, s.approach_burst_ms);
            self.delay.delay_ms(s.approach_settle_ms);
        } else {
            tracing::debug!(distance_mm = d, "target out of band, correcting");
            self.pulse(s.correction, s.correction_ms);
        }
    }

    fn classify_paper(&mut self) {
        let s = self.settings;
        let reading = self.camera.all_off().and_then(|()| {
            if s.diagnostic_channels {
                for channel in [Illumination::Red, Illumination::Green] {
                    let diag = self.camera.read_under(channel)?;
                    self.sink.emit(&Telemetry::Ldr {
                        channel,
                        volts: diag.voltage,
                    });
                }
            }
            self.camera.read_under(Illumination::Blue)
        });

        let blue = match reading {
            Ok(sample) => sample,
            Err(e) => {
                tracing::error!(error = ?e, "reflectance read failed, retrying");
                return;
            }
        };
        self.sink.emit(&Telemetry::Ldr {
            channel: Illumination::Blue,
            volts: blue.voltage,
        });

        let colour = classify(blue.voltage, s.colour_threshold_v);
        tracing::info!(voltage = blue.voltage, ?colour, "paper classified");
        self.sink.emit(&Telemetry::Paper { colour });
        if let Err(e) = self
            .camera
            .feedback(colour.lamp(), s.blink_off_ms, s.blink_on_ms)
        {
            tracing::error!(error = ?e, "feedback blink failed");
        }

        self.colour = Some(colour);
        self.state = BehaviorState::Done;
    }

    /// Take `samples_per_scan` readings, reporting each, and return the last.
    fn scan<F>(
        &mut self,
        event: F,
    ) -> DistanceSample
    where
        F: Fn(i32) -> Telemetry,
    {
        let mut sample = self.ranger.measure();
        self.sink.emit(&event(sample.distance_mm as i32));
        for _ in 1..self.settings.samples_per_scan {
            sample = self.ranger.measure();
            self.sink.emit(&event(sample.distance_mm as i32));
        }
        self.last_sample = Some(sample);
        sample
    }

    /// Drive `cmd` for `ms`, then stop.
    fn pulse(
        &mut self,
        cmd: VelocityCommand,
        ms: u32,
    ) {
        self.command(cmd);
        self.delay.delay_ms(ms);
        self.command(VelocityCommand::STOP);
    }

    fn command(
        &mut self,
        cmd: VelocityCommand,
    ) {
        if let Err(e) = self.drive.drive(cmd) {
            tracing::error!(error = ?e, left = cmd.left, right = cmd.right, "drive command failed");
        }
    }

    fn halt(&mut self) {
        self.command(VelocityCommand::STOP);
        if let Err(e) = self.camera.all_off() {
            tracing::error!(error = ?e, "could not switch LEDs off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_threshold() {
        assert_eq!(classify(1.20, 1.45), PaperColour::Blue);
        assert_eq!(classify(1.60, 1.45), PaperColour::Red);
        assert_eq!(classify(1.45, 1.45), PaperColour::Red);
        assert_eq!(classify(1.449, 1.45), PaperColour::Blue);
    }

    #[test]
    fn states_are_ordered() {
        assert_ne!(BehaviorState::Idle, BehaviorState::Searching);
        assert_eq!(
            serde_json::to_string(&BehaviorState::Approaching).unwrap(),
            "\"approaching\""
        );
    }
}
