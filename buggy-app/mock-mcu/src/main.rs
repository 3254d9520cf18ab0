mod sim;

use core::cell::RefCell;
use std::{fs, path::PathBuf, process::ExitCode};

use buggy_core::mk_static;
use buggy_core::utils::{
    config::BuggyConfig,
    controllers::{
        BehaviorController, BehaviorState, Drive, DriveTrain, Pca9685Motor, Reflectometer,
        Ultrasonic, motors::Ramp,
    },
    telemetry::{ChannelSink, PaperColour, Telemetry, TELEMETRY_CHANNEL},
};
use clap::{Parser, ValueEnum};
use pwm_pca9685::Channel;
use serde::Serialize;
use tracing::{error, info, warn};

use sim::{SimDelay, SimEcho, SimLdr, SimLed, SimPca, SimTimer, SimTrigger, World};

const PWM_ADDRESS: u8 = 0x40;

#[derive(Clone, Copy, ValueEnum)]
enum Paper {
    Blue,
    Red,
}

impl From<Paper> for PaperColour {
    fn from(p: Paper) -> Self {
        match p {
            Paper::Blue => PaperColour::Blue,
            Paper::Red => PaperColour::Red,
        }
    }
}

#[derive(Parser)]
/// Run the seeker buggy against a simulated arena.
///
/// The search is open loop, so an object first seen at the edge of the beam
/// can be driven past; such runs end at the iteration limit.
#[clap(version = "1.0")]
struct Opts
{
    /// colour of the paper stuck to the object
    #[clap(long, value_enum, default_value = "blue")]
    paper: Paper,
    /// object bearing from the buggy's starting heading (degrees, counterclockwise)
    #[clap(long, default_value_t = 10.0, allow_negative_numbers = true)]
    bearing: f32,
    /// distance from the buggy to the object surface (mm)
    #[clap(long, default_value_t = 400.0)]
    range: f32,
    /// object radius (mm)
    #[clap(long, default_value_t = 40.0)]
    radius: f32,
    /// JSON file overriding the calibrated settings
    #[clap(long)]
    config: Option<PathBuf>,
    /// give up after this many steps
    #[clap(long, default_value_t = 200)]
    max_iterations: u32,
    /// spin the motors through a ramp before searching
    #[clap(long)]
    spin_test: bool,
    /// print telemetry as JSON lines instead of serial text
    #[clap(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary {
    state: BehaviorState,
    colour: Option<PaperColour>,
    iterations: u32,
    sim_time_ms: u64,
    travelled_mm: f32,
    heading_deg: f32,
    final_range_mm: Option<f32>,
    pwm_prescale: u8,
}

fn load_config(path: Option<&PathBuf>) -> Result<BuggyConfig, String> {
    let Some(path) = path else {
        return Ok(BuggyConfig::default());
    };
    let bytes = fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    BuggyConfig::from_json(&bytes).map_err(|e| format!("parsing {}: {e}", path.display()))
}

/// Forward everything queued on the telemetry channel to stdout.
fn drain_telemetry(json: bool) {
    while let Ok(event) = TELEMETRY_CHANNEL.try_receive() {
        if event == Telemetry::Arrived {
            info!("arrived, playing tune");
        }
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("telemetry encode failed: {e}"),
            }
        } else {
            print!("{event}");
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts: Opts = Opts::parse();
    let mut cfg = match load_config(opts.config.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    cfg.behavior.max_iterations = cfg.behavior.max_iterations.or(Some(opts.max_iterations));

    let world = World::new(opts.range, opts.bearing, opts.radius, opts.paper.into()).shared();

    // Shared I2C bus with the motor PWM controller.
    let i2c_bus: &'static RefCell<SimPca> =
        mk_static!(RefCell<SimPca>, RefCell::new(SimPca::new(world.clone(), PWM_ADDRESS)));

    let motors = Pca9685Motor::new(i2c_bus, PWM_ADDRESS, Channel::C2, Channel::C3).and_then(|left| {
        let right = Pca9685Motor::new(i2c_bus, PWM_ADDRESS, Channel::C4, Channel::C5)?;
        DriveTrain::new(left, right, cfg.drive.period_ms)
    });
    let mut drive = match motors {
        Ok(drive) => drive,
        Err(e) => {
            error!("motor bring-up failed: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    if opts.spin_test {
        let mut delay = SimDelay(world.clone());
        if let Err(e) = drive.ramp(&mut delay, Ramp::default()).and_then(|()| drive.stop()) {
            warn!("spin test failed: {:?}", e);
        }
    }

    let ranger = Ultrasonic::new(
        SimTrigger::new(world.clone()),
        SimEcho(world.clone()),
        SimTimer::new(world.clone()),
        SimDelay(world.clone()),
        cfg.ranger,
    );
    let camera = Reflectometer::new(
        SimLed::rgb(&world),
        SimLdr::new(world.clone(), cfg.reflectance),
        SimDelay(world.clone()),
        cfg.reflectance,
    );
    let mut controller = BehaviorController::new(
        ranger,
        drive,
        camera,
        SimDelay(world.clone()),
        ChannelSink,
        cfg.behavior,
    );

    info!(
        paper = ?PaperColour::from(opts.paper),
        range_mm = opts.range,
        bearing_deg = opts.bearing,
        "buggy ready, starting search"
    );
    controller.start();
    loop {
        let state = controller.step();
        drain_telemetry(opts.json);
        if state == BehaviorState::Done {
            break;
        }
        if controller
            .settings()
            .max_iterations
            .is_some_and(|max| controller.iterations() >= max)
        {
            warn!(?state, "iteration limit reached, stopping");
            break;
        }
    }

    let state = controller.state();
    let colour = controller.colour();
    let iterations = controller.iterations();
    let (mut ranger, mut drive, _, _, _) = controller.release();
    if let Err(e) = drive.stop() {
        error!("could not stop motors: {:?}", e);
    }

    let final_range = ranger.report_calibrated(&mut ChannelSink);
    drain_telemetry(opts.json);

    let summary = {
        let w = world.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Summary {
            state,
            colour,
            iterations,
            sim_time_ms: w.clock_us() / 1000,
            travelled_mm: w.travelled_mm(),
            heading_deg: w.heading_deg(),
            final_range_mm: final_range.valid.then_some(final_range.distance_mm),
            pwm_prescale: i2c_bus.borrow().prescale(),
        }
    };
    match serde_json::to_string(&summary) {
        Ok(line) if opts.json => println!("{line}"),
        Ok(_) => {
            println!();
            info!(
                state = ?summary.state,
                colour = ?summary.colour,
                iterations = summary.iterations,
                sim_time_ms = summary.sim_time_ms,
                travelled_mm = summary.travelled_mm,
                "run finished"
            );
        }
        Err(e) => error!("summary encode failed: {e}"),
    }

    if colour.is_some() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
