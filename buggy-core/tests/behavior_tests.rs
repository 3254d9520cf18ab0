use std::{collections::VecDeque, sync::atomic::AtomicBool};

use buggy_core::utils::{
    config::BehaviorSettings,
    controllers::{
        BehaviorController, BehaviorState, DistanceSample, DistanceSensor, Drive, DriveError,
        Illumination, ReflectanceSample, ReflectanceSensor, RunOutcome, VelocityCommand,
    },
    telemetry::{ChannelSink, PaperColour, Telemetry, TelemetrySink, TELEMETRY_CHANNEL},
};
use embedded_hal_mock::eh1::delay::NoopDelay;

/// Plays back a fixed list of samples, then reports timeouts.
struct ScriptedRanger {
    samples: VecDeque<DistanceSample>,
}

impl ScriptedRanger {
    fn new(mm: &[f32]) -> Self {
        Self {
            samples: mm.iter().map(|&d| DistanceSample::valid(d)).collect(),
        }
    }
}

impl DistanceSensor for ScriptedRanger {
    fn measure(&mut self) -> DistanceSample {
        self.samples
            .pop_front()
            .unwrap_or(DistanceSample::timeout(4310.0))
    }
}

#[derive(Default)]
struct RecordingDrive {
    commands: Vec<VelocityCommand>,
}

impl Drive for RecordingDrive {
    type Error = ();

    fn drive(
        &mut self,
        cmd: VelocityCommand,
    ) -> Result<(), DriveError<()>> {
        cmd.validate().map_err(DriveError::Range)?;
        self.commands.push(cmd);
        Ok(())
    }
}

struct FakeCamera {
    voltages: VecDeque<Result<f32, ()>>,
    reads: Vec<Illumination>,
    feedback: Vec<(Illumination, u32, u32)>,
    lit: Option<Illumination>,
}

impl FakeCamera {
    fn reading(v: f32) -> Self {
        Self::script(vec![Ok(v)])
    }

    fn script(voltages: Vec<Result<f32, ()>>) -> Self {
        Self {
            voltages: voltages.into(),
            reads: Vec::new(),
            feedback: Vec::new(),
            lit: None,
        }
    }
}

impl ReflectanceSensor for FakeCamera {
    type Error = ();

    fn read_under(
        &mut self,
        channel: Illumination,
    ) -> Result<ReflectanceSample, ()> {
        self.lit = Some(channel);
        self.reads.push(channel);
        let voltage = self.voltages.pop_front().unwrap_or(Ok(1.0))?;
        Ok(ReflectanceSample { voltage, channel })
    }

    fn all_off(&mut self) -> Result<(), ()> {
        self.lit = None;
        Ok(())
    }

    fn feedback(
        &mut self,
        channel: Illumination,
        off_ms: u32,
        on_ms: u32,
    ) -> Result<(), ()> {
        self.feedback.push((channel, off_ms, on_ms));
        self.lit = None;
        Ok(())
    }
}

#[derive(Default)]
struct VecSink(Vec<Telemetry>);

impl TelemetrySink for VecSink {
    fn emit(
        &mut self,
        event: &Telemetry,
    ) {
        self.0.push(*event);
    }
}

type Controller<'a> =
    BehaviorController<ScriptedRanger, RecordingDrive, FakeCamera, NoopDelay, &'a mut VecSink>;

fn controller<'a>(
    mm: &[f32],
    camera: FakeCamera,
    sink: &'a mut VecSink,
    settings: BehaviorSettings,
) -> Controller<'a> {
    BehaviorController::new(
        ScriptedRanger::new(mm),
        RecordingDrive::default(),
        camera,
        NoopDelay::new(),
        sink,
        settings,
    )
}

#[test]
fn idle_waits_for_start() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[100.0], FakeCamera::reading(1.2), &mut sink, BehaviorSettings::default());
    assert_eq!(ctrl.step(), BehaviorState::Idle);
    assert_eq!(ctrl.iterations(), 0);
    drop(ctrl);
    assert!(sink.0.is_empty());
}

#[test]
fn search_uses_last_of_four_samples() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[650.0, 620.0, 610.0, 580.0],
        FakeCamera::reading(1.2),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    assert_eq!(ctrl.step(), BehaviorState::Approaching);
    assert_eq!(ctrl.last_sample(), Some(DistanceSample::valid(580.0)));

    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(
        drive.commands,
        vec![VelocityCommand::new(0.0, 1.0), VelocityCommand::STOP]
    );
    assert_eq!(
        sink.0,
        vec![
            Telemetry::ObjectDistance { mm: 650 },
            Telemetry::ObjectDistance { mm: 620 },
            Telemetry::ObjectDistance { mm: 610 },
            Telemetry::ObjectDistance { mm: 580 },
            Telemetry::ObjectFound,
        ]
    );
}

#[test]
fn search_ignores_early_close_samples() {
    // Only the last sample of a scan counts, even if an earlier one was close.
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[500.0, 550.0, 580.0, 650.0],
        FakeCamera::reading(1.2),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    assert_eq!(ctrl.step(), BehaviorState::Searching);
}

#[test]
fn search_treats_timeouts_as_out_of_range() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[], FakeCamera::reading(1.2), &mut sink, BehaviorSettings::default());
    ctrl.start();
    assert_eq!(ctrl.step(), BehaviorState::Searching);
    assert_eq!(ctrl.step(), BehaviorState::Searching);
    assert!(!ctrl.last_sample().unwrap().valid);
    drop(ctrl);
    assert_eq!(sink.0.len(), 8);
    assert_eq!(sink.0[0], Telemetry::ObjectDistance { mm: 4310 });
}

#[test]
fn approach_close_range_wins_over_band() {
    // 25 mm sits in both the approach band [20, 500) and the arrival band (< 30).
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 40.0, 30.0, 27.0, 25.0],
        FakeCamera::reading(1.2),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    assert_eq!(ctrl.step(), BehaviorState::Approaching);
    assert_eq!(ctrl.step(), BehaviorState::Classifying);

    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(drive.commands.last(), Some(&VelocityCommand::STOP));
    assert_eq!(
        sink.0[5..],
        [
            Telemetry::ArrivalDistance { mm: 40 },
            Telemetry::ArrivalDistance { mm: 30 },
            Telemetry::ArrivalDistance { mm: 27 },
            Telemetry::ArrivalDistance { mm: 25 },
            Telemetry::Arrived,
        ]
    );
}

#[test]
fn approach_band_drives_forward_burst() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 320.0, 310.0, 305.0, 300.0],
        FakeCamera::reading(1.2),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    ctrl.step();
    assert_eq!(ctrl.step(), BehaviorState::Approaching);

    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(
        drive.commands[2..],
        [VelocityCommand::new(-0.8, 0.77), VelocityCommand::STOP]
    );
}

#[test]
fn approach_out_of_band_corrects() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 550.0, 560.0, 540.0, 520.0],
        FakeCamera::reading(1.2),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    ctrl.step();
    assert_eq!(ctrl.step(), BehaviorState::Approaching);
    // Script exhausted: the echo times out, which is also out of band.
    assert_eq!(ctrl.step(), BehaviorState::Approaching);

    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(
        drive.commands[2..],
        [
            VelocityCommand::new(-0.75, 0.75),
            VelocityCommand::STOP,
            VelocityCommand::new(-0.75, 0.75),
            VelocityCommand::STOP,
        ]
    );
}

#[test]
fn classify_blue_paper() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 25.0, 25.0, 25.0, 25.0],
        FakeCamera::reading(1.20),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    ctrl.step();
    ctrl.step();
    assert_eq!(ctrl.step(), BehaviorState::Done);
    assert_eq!(ctrl.colour(), Some(PaperColour::Blue));
    assert_eq!(ctrl.step(), BehaviorState::Done);
    assert_eq!(ctrl.iterations(), 3);

    let (_, _, camera, _, _) = ctrl.release();
    assert_eq!(camera.reads, vec![Illumination::Blue]);
    assert_eq!(camera.feedback, vec![(Illumination::Blue, 1000, 5000)]);
    assert_eq!(camera.lit, None);
    assert_eq!(
        sink.0[sink.0.len() - 2..],
        [
            Telemetry::Ldr {
                channel: Illumination::Blue,
                volts: 1.20
            },
            Telemetry::Paper {
                colour: PaperColour::Blue
            },
        ]
    );
}

#[test]
fn classify_threshold_tie_is_red() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 10.0, 10.0, 10.0, 10.0],
        FakeCamera::reading(1.45),
        &mut sink,
        BehaviorSettings::default(),
    );
    assert_eq!(
        ctrl.run(&AtomicBool::new(false)),
        RunOutcome::Finished(PaperColour::Red)
    );
    let (_, _, camera, _, _) = ctrl.release();
    assert_eq!(camera.feedback, vec![(Illumination::Red, 1000, 5000)]);
}

#[test]
fn classify_red_paper_with_diagnostics() {
    let settings = BehaviorSettings {
        diagnostic_channels: true,
        ..BehaviorSettings::default()
    };
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 25.0, 25.0, 25.0, 25.0],
        FakeCamera::script(vec![Ok(2.0), Ok(1.8), Ok(1.60)]),
        &mut sink,
        settings,
    );
    assert_eq!(
        ctrl.run(&AtomicBool::new(false)),
        RunOutcome::Finished(PaperColour::Red)
    );
    let (_, _, camera, _, _) = ctrl.release();
    assert_eq!(
        camera.reads,
        vec![Illumination::Red, Illumination::Green, Illumination::Blue]
    );

    let ldr: Vec<_> = sink
        .0
        .iter()
        .filter(|e| matches!(e, Telemetry::Ldr { .. }))
        .copied()
        .collect();
    assert_eq!(
        ldr,
        vec![
            Telemetry::Ldr {
                channel: Illumination::Red,
                volts: 2.0
            },
            Telemetry::Ldr {
                channel: Illumination::Green,
                volts: 1.8
            },
            Telemetry::Ldr {
                channel: Illumination::Blue,
                volts: 1.60
            },
        ]
    );
}

#[test]
fn classify_retries_after_read_failure() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(
        &[580.0, 580.0, 580.0, 580.0, 25.0, 25.0, 25.0, 25.0],
        FakeCamera::script(vec![Err(()), Ok(1.2)]),
        &mut sink,
        BehaviorSettings::default(),
    );
    ctrl.start();
    ctrl.step();
    ctrl.step();
    assert_eq!(ctrl.step(), BehaviorState::Classifying);
    assert_eq!(ctrl.colour(), None);
    assert_eq!(ctrl.step(), BehaviorState::Done);
    assert_eq!(ctrl.colour(), Some(PaperColour::Blue));
}

#[test]
fn run_stops_at_iteration_limit() {
    let settings = BehaviorSettings {
        max_iterations: Some(3),
        ..BehaviorSettings::default()
    };
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[], FakeCamera::reading(1.2), &mut sink, settings);

    assert_eq!(
        ctrl.run(&AtomicBool::new(false)),
        RunOutcome::IterationLimit(BehaviorState::Searching)
    );
    assert_eq!(ctrl.iterations(), 3);
    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(drive.commands.len(), 3 * 2 + 1);
    assert_eq!(drive.commands.last(), Some(&VelocityCommand::STOP));
}

#[test]
fn run_honours_cancellation() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[], FakeCamera::reading(1.2), &mut sink, BehaviorSettings::default());

    assert_eq!(
        ctrl.run(&AtomicBool::new(true)),
        RunOutcome::Cancelled(BehaviorState::Searching)
    );
    assert_eq!(ctrl.iterations(), 0);
    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(drive.commands, vec![VelocityCommand::STOP]);
}

#[test]
fn rejected_command_leaves_state_unchanged() {
    // A mis-configured sweep is rejected by the drive; the search keeps going.
    let settings = BehaviorSettings {
        sweep: VelocityCommand::new(1.5, 0.0),
        ..BehaviorSettings::default()
    };
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[700.0; 4], FakeCamera::reading(1.2), &mut sink, settings);
    ctrl.start();
    assert_eq!(ctrl.step(), BehaviorState::Searching);
    let (_, drive, _, _, _) = ctrl.release();
    assert_eq!(drive.commands, vec![VelocityCommand::STOP]);
}

#[test]
fn channel_sink_holds_sixteen_events_without_a_consumer() {
    let settings = BehaviorSettings {
        max_iterations: Some(5),
        ..BehaviorSettings::default()
    };
    let mut ctrl = BehaviorController::new(
        ScriptedRanger::new(&[]),
        RecordingDrive::default(),
        FakeCamera::reading(1.2),
        NoopDelay::new(),
        ChannelSink,
        settings,
    );
    // Five searching steps report twenty samples into a sixteen-slot channel.
    ctrl.run(&AtomicBool::new(false));

    let mut received = 0;
    while TELEMETRY_CHANNEL.try_receive().is_ok() {
        received += 1;
    }
    assert_eq!(received, 16);
}

#[test]
fn stepping_lets_the_caller_drain_between_steps() {
    let mut sink = VecSink::default();
    let mut ctrl = controller(&[], FakeCamera::reading(1.2), &mut sink, BehaviorSettings::default());
    ctrl.start();
    for _ in 0..5 {
        ctrl.step();
    }
    drop(ctrl);
    assert_eq!(sink.0.len(), 20);
}
