//! A simulated arena: one buggy, one object with a sheet of paper on it.
//!
//! Every peripheral shares the `World` and advances its microsecond clock.
//! Motion is integrated whenever time passes, from the duties last written
//! to the simulated PCA9685.

use std::{
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use buggy_core::utils::{
    config::ReflectanceSettings,
    controllers::{AnalogInput, Illumination, MicrosTimer},
    telemetry::PaperColour,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{self, InputPin, OutputPin},
    i2c::{self, ErrorKind, NoAcknowledgeSource, Operation},
};

/// Forward speed at full differential duty (mm/s).
const TOP_SPEED_MM_S: f32 = 200.0;
/// Turn rate at full common-mode duty (°/s).
const TOP_TURN_DEG_S: f32 = 90.0;
/// Echo starts this long after the trigger falls (µs).
const ECHO_LATENCY_US: u64 = 150;
/// Each echo poll costs this much simulated time (µs).
const POLL_COST_US: u64 = 5;
const BEAM_HALF_ANGLE_DEG: f32 = 15.0;
const MAX_ECHO_RANGE_MM: f32 = 4000.0;
/// The bumper keeps the sensor this far from the object.
const BUMPER_MM: f32 = 10.0;
/// LDR only sees the paper from this close.
const PAPER_VIEW_MM: f32 = 50.0;
const MAX_STEP_US: u64 = 10_000;

pub type SharedWorld = Arc<Mutex<World>>;

fn lock(world: &SharedWorld) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct World {
    clock_us: u64,
    x_mm: f32,
    y_mm: f32,
    heading_deg: f32,
    object: (f32, f32),
    object_radius_mm: f32,
    paper: PaperColour,
    duties: [f32; 16],
    leds: [bool; 3],
    echo: Option<(u64, u64)>,
    travelled_mm: f32,
}

impl World {
    /// Buggy at the origin facing 0°, object centre `range_mm` away at `bearing_deg`.
    pub fn new(
        range_mm: f32,
        bearing_deg: f32,
        object_radius_mm: f32,
        paper: PaperColour,
    ) -> Self {
        let centre = range_mm + object_radius_mm;
        let (sin, cos) = bearing_deg.to_radians().sin_cos();
        Self {
            clock_us: 0,
            x_mm: 0.0,
            y_mm: 0.0,
            heading_deg: 0.0,
            object: (centre * cos, centre * sin),
            object_radius_mm,
            paper,
            duties: [0.0; 16],
            leds: [false; 3],
            echo: None,
            travelled_mm: 0.0,
        }
    }

    pub fn shared(self) -> SharedWorld {
        Arc::new(Mutex::new(self))
    }

    pub fn clock_us(&self) -> u64 {
        self.clock_us
    }

    pub fn travelled_mm(&self) -> f32 {
        self.travelled_mm
    }

    pub fn heading_deg(&self) -> f32 {
        self.heading_deg
    }

    /// Distance from the sensor to the object surface and its bearing off the nose.
    pub fn target(&self) -> (f32, f32) {
        let dx = self.object.0 - self.x_mm;
        let dy = self.object.1 - self.y_mm;
        let surface = (dx.hypot(dy) - self.object_radius_mm).max(0.0);
        let bearing = normalize_deg(dy.atan2(dx).to_degrees() - self.heading_deg);
        (surface, bearing)
    }

    /// Left and right motor speeds from the PCA9685 channel pairs C2/C3 and C4/C5.
    fn motor_speeds(&self) -> (f32, f32) {
        (
            self.duties[2] - self.duties[3],
            self.duties[4] - self.duties[5],
        )
    }

    pub fn advance(
        &mut self,
        mut dt_us: u64,
    ) {
        while dt_us > 0 {
            let chunk = dt_us.min(MAX_STEP_US);
            self.integrate(chunk as f32 / 1_000_000.0);
            self.clock_us += chunk;
            dt_us -= chunk;
        }
    }

    fn integrate(
        &mut self,
        dt_s: f32,
    ) {
        let (left, right) = self.motor_speeds();
        // Left motor is mirrored: straight ahead is (-x, +x).
        let v = (right - left) / 2.0 * TOP_SPEED_MM_S;
        let omega = (left + right) / 2.0 * TOP_TURN_DEG_S;

        self.heading_deg = normalize_deg(self.heading_deg + omega * dt_s);
        let (sin, cos) = self.heading_deg.to_radians().sin_cos();
        let (x, y) = (self.x_mm + v * dt_s * cos, self.y_mm + v * dt_s * sin);

        let dx = self.object.0 - x;
        let dy = self.object.1 - y;
        let stop = self.object_radius_mm + BUMPER_MM;
        let moved = if dx.hypot(dy) < stop {
            0.0
        } else {
            self.x_mm = x;
            self.y_mm = y;
            (v * dt_s).abs()
        };
        self.travelled_mm += moved;
    }

    fn fire(&mut self) {
        let (surface, bearing) = self.target();
        // Half the angle the object subtends widens the beam up close.
        let subtended = (self.object_radius_mm / (surface + self.object_radius_mm))
            .min(1.0)
            .asin()
            .to_degrees();
        let in_beam = bearing.abs() <= BEAM_HALF_ANGLE_DEG + subtended;
        self.echo = (in_beam && surface <= MAX_ECHO_RANGE_MM).then(|| {
            let start = self.clock_us + ECHO_LATENCY_US;
            (start, start + (surface * 5.8) as u64)
        });
    }

    fn echo_level(&self) -> bool {
        self.echo
            .is_some_and(|(start, end)| (start..end).contains(&self.clock_us))
    }

    /// LDR voltage for whatever is currently lit.
    fn ldr_volts(&self) -> f32 {
        let (surface, _) = self.target();
        let lit = self.leds.iter().position(|&on| on);
        let Some(lit) = lit.filter(|_| surface <= PAPER_VIEW_MM) else {
            return 0.4;
        };
        let table = match self.paper {
            PaperColour::Blue => [0.90, 1.00, 1.20],
            PaperColour::Red => [2.10, 1.10, 1.60],
        };
        table[lit]
    }
}

fn normalize_deg(deg: f32) -> f32 {
    let d = deg.rem_euclid(360.0);
    if d > 180.0 { d - 360.0 } else { d }
}

/// PCA9685 register file on a fake bus.
pub struct SimPca {
    world: SharedWorld,
    address: u8,
    regs: [u8; 256],
}

impl SimPca {
    pub fn new(
        world: SharedWorld,
        address: u8,
    ) -> Self {
        Self {
            world,
            address,
            regs: [0; 256],
        }
    }

    pub fn prescale(&self) -> u8 {
        self.regs[0xFE]
    }

    fn write_regs(
        &mut self,
        bytes: &[u8],
    ) {
        let Some((&start, data)) = bytes.split_first() else {
            return;
        };
        // MODE1 bit 5 enables register auto-increment.
        let auto_increment = self.regs[0x00] & 0x20 != 0;
        for (i, &b) in data.iter().enumerate() {
            let reg = if auto_increment { start as usize + i } else { start as usize };
            self.regs[reg & 0xFF] = b;
        }

        let mut world = lock(&self.world);
        for (channel, duty) in world.duties.iter_mut().enumerate() {
            let base = 0x06 + 4 * channel;
            let on = u16::from_le_bytes([self.regs[base], self.regs[base + 1]]);
            let off = u16::from_le_bytes([self.regs[base + 2], self.regs[base + 3]]);
            *duty = if off & 0x1000 != 0 {
                0.0
            } else if on & 0x1000 != 0 {
                1.0
            } else {
                f32::from((off & 0x0FFF).wrapping_sub(on & 0x0FFF) & 0x0FFF) / 4095.0
            };
        }
    }
}

impl i2c::ErrorType for SimPca {
    type Error = ErrorKind;
}

impl i2c::I2c for SimPca {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        let mut pointer = 0u8;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some(&reg) = bytes.first() {
                        pointer = reg;
                    }
                    self.write_regs(bytes);
                }
                Operation::Read(buf) => {
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = self.regs[(pointer as usize + i) & 0xFF];
                    }
                }
            }
        }
        Ok(())
    }
}

/// Blocking delay that lets the world run.
#[derive(Clone)]
pub struct SimDelay(pub SharedWorld);

impl DelayNs for SimDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        lock(&self.0).advance(u64::from(ns).div_ceil(1000));
    }
}

pub struct SimTimer {
    world: SharedWorld,
    origin_us: u64,
}

impl SimTimer {
    pub fn new(world: SharedWorld) -> Self {
        Self {
            world,
            origin_us: 0,
        }
    }
}

impl MicrosTimer for SimTimer {
    fn reset(&mut self) {
        self.origin_us = lock(&self.world).clock_us;
    }

    fn elapsed_us(&mut self) -> u32 {
        (lock(&self.world).clock_us - self.origin_us) as u32
    }
}

pub struct SimTrigger {
    world: SharedWorld,
    high: bool,
}

impl SimTrigger {
    pub fn new(world: SharedWorld) -> Self {
        Self { world, high: false }
    }
}

impl digital::ErrorType for SimTrigger {
    type Error = Infallible;
}

impl OutputPin for SimTrigger {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.high {
            lock(&self.world).fire();
        }
        self.high = false;
        Ok(())
    }
}

pub struct SimEcho(pub SharedWorld);

impl digital::ErrorType for SimEcho {
    type Error = Infallible;
}

impl InputPin for SimEcho {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let mut world = lock(&self.0);
        world.advance(POLL_COST_US);
        Ok(world.echo_level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

pub struct SimLed {
    world: SharedWorld,
    index: usize,
}

impl SimLed {
    /// The red, green and blue LEDs.
    pub fn rgb(world: &SharedWorld) -> [SimLed; 3] {
        Illumination::ALL.map(|channel| SimLed {
            world: world.clone(),
            index: channel as usize,
        })
    }
}

impl digital::ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        lock(&self.world).leds[self.index] = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        lock(&self.world).leds[self.index] = false;
        Ok(())
    }
}

/// LDR behind the divider, read as a fraction of the ADC reference.
pub struct SimLdr {
    world: SharedWorld,
    settings: ReflectanceSettings,
}

impl SimLdr {
    pub fn new(
        world: SharedWorld,
        settings: ReflectanceSettings,
    ) -> Self {
        Self { world, settings }
    }
}

impl AnalogInput for SimLdr {
    type Error = Infallible;

    fn read_fraction(&mut self) -> Result<f32, Self::Error> {
        let world = lock(&self.world);
        let lit = world.leds.iter().position(|&on| on).unwrap_or(Illumination::Blue as usize);
        let divisor = self.settings.divisors[lit];
        Ok((world.ldr_volts() * divisor / self.settings.reference_v).clamp(0.0, 1.0))
    }
}
