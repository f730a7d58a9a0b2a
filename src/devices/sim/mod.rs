//! Simulated chassis for hardware-free development
//!
//! Replaces the TR-60 bridge with a physics loop driving the same handle
//! set, so the whole engine runs unmodified against it:
//!
//! | Component | Simulation |
//! |-----------|------------|
//! | Encoder pulses | Duty-count-proportional rate, fractional accumulator |
//! | Chassis pose | Differential drive kinematics from track speeds |
//! | Gyro | Scaled yaw rate + resting bias + Gaussian noise |
//! | Infrared | Scripted per-head-angle raw values over a floor default |
//! | Ultrasonic | Scripted range with a short echo delay, or no echo |
//! | Light | World-bearing source with linear falloff over the look angle |
//! | Tilt / jams | Directly scripted |
//!
//! Tests drive the world through a [`SimHandle`]; everything else goes
//! through the ordinary [`DeviceHandles`] seam.

mod noise;
mod physics;

use crate::config::SimConfig;
use crate::core::bridge::{
    AnalogSensors, DeviceHandles, DeviceSupervisor, DriveControl, HeadServo, PulseForwarder,
    PulseTaps,
};
use crate::core::types::{TrackDrive, TrackSide};
use crate::error::{Error, Result};

use crossbeam_channel::bounded;
use noise::NoiseGenerator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI8, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Time between an ultrasonic trigger and the echo becoming available
const ECHO_DELAY: Duration = Duration::from_millis(4);

/// Atomic f32 stored as its bit pattern
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Commanded bridge state plus live readouts, shared between the handle
/// objects and the physics loop
struct SimShared {
    left_drive: AtomicU8,
    right_drive: AtomicU8,
    left_count: AtomicU8,
    right_count: AtomicU8,
    drive_power: AtomicBool,
    pulse_sense: AtomicBool,
    head_angle: AtomicI8,
    /// Latest simulated gyro sample, written every physics tick
    gyro_now: AtomicI32,
    /// Chassis heading in degrees, CCW positive, unbounded
    heading_deg: AtomicF32,
    pos_x: AtomicF32,
    pos_y: AtomicF32,
}

impl SimShared {
    fn new() -> Self {
        Self {
            left_drive: AtomicU8::new(TrackDrive::FastStop as u8),
            right_drive: AtomicU8::new(TrackDrive::FastStop as u8),
            left_count: AtomicU8::new(0),
            right_count: AtomicU8::new(0),
            drive_power: AtomicBool::new(false),
            pulse_sense: AtomicBool::new(false),
            head_angle: AtomicI8::new(0),
            gyro_now: AtomicI32::new(0),
            heading_deg: AtomicF32::new(0.0),
            pos_x: AtomicF32::new(0.0),
            pos_y: AtomicF32::new(0.0),
        }
    }
}

/// Scriptable environment around the simulated chassis
pub struct SimWorld {
    /// Raw infrared where no per-angle override applies (bare floor)
    pub ir_surface: u16,
    /// Scripted infrared readings keyed by head angle
    ir_overrides: HashMap<i8, u16>,
    /// Ultrasonic echo range; `None` means no echo ever returns
    pub us_mm: Option<u16>,
    /// Tilt switch state
    pub tilt: bool,
    /// Light level with no source in view
    pub light_ambient: u16,
    /// Light source as (world bearing in degrees, peak intensity)
    pub light_source: Option<(f32, u16)>,
    /// A jammed track neither moves nor produces pulses
    pub jam_left: bool,
    pub jam_right: bool,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            ir_surface: 90,
            ir_overrides: HashMap::new(),
            us_mm: Some(800),
            tilt: false,
            light_ambient: 30,
            light_source: None,
            jam_left: false,
            jam_right: false,
        }
    }
}

/// Test-side controls for the simulated world
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<SimShared>,
    world: Arc<Mutex<SimWorld>>,
}

impl SimHandle {
    /// Script the infrared value seen at one head angle
    pub fn set_ir_at(&self, head_angle: i8, raw: u16) {
        self.world.lock().ir_overrides.insert(head_angle, raw);
    }

    /// Remove every scripted infrared override
    pub fn clear_ir_overrides(&self) {
        self.world.lock().ir_overrides.clear();
    }

    /// Script the ultrasonic echo range; `None` silences the echo
    pub fn set_ultrasonic(&self, mm: Option<u16>) {
        self.world.lock().us_mm = mm;
    }

    pub fn set_tilt(&self, tilted: bool) {
        self.world.lock().tilt = tilted;
    }

    /// Place a light source at a world bearing with the given peak value
    pub fn set_light_source(&self, bearing_deg: f32, peak: u16) {
        self.world.lock().light_source = Some((bearing_deg, peak));
    }

    pub fn clear_light_source(&self) {
        self.world.lock().light_source = None;
    }

    /// Jam or free one track
    pub fn set_jam(&self, side: TrackSide, jammed: bool) {
        let mut w = self.world.lock();
        match side {
            TrackSide::Left => w.jam_left = jammed,
            TrackSide::Right => w.jam_right = jammed,
        }
    }

    /// Chassis heading in degrees, CCW positive, unbounded
    pub fn heading_degrees(&self) -> f32 {
        self.shared.heading_deg.load(Ordering::Relaxed)
    }

    /// Chassis pose as (x cm, y cm, heading degrees)
    pub fn pose(&self) -> (f32, f32, f32) {
        (
            self.shared.pos_x.load(Ordering::Relaxed),
            self.shared.pos_y.load(Ordering::Relaxed),
            self.shared.heading_deg.load(Ordering::Relaxed),
        )
    }
}

/// Build the simulated device.
///
/// Returns the engine-facing handles plus the [`SimHandle`] tests use to
/// script the world.
pub fn create(config: &SimConfig) -> Result<(DeviceHandles, SimHandle)> {
    let shared = Arc::new(SimShared::new());
    let world = Arc::new(Mutex::new(SimWorld::default()));
    let shutdown = Arc::new(AtomicBool::new(false));
    let noise = NoiseGenerator::new(config.seed);

    let (left_tx, left_rx) = bounded(1);
    let (right_tx, right_rx) = bounded(1);

    let physics = {
        let config = config.clone();
        let shared = Arc::clone(&shared);
        let world = Arc::clone(&world);
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("sim-physics".to_string())
            .spawn(move || {
                physics::physics_loop(
                    config,
                    shared,
                    world,
                    shutdown,
                    PulseForwarder::new(left_tx),
                    PulseForwarder::new(right_tx),
                    noise,
                )
            })
            .map_err(|e| Error::Thread(format!("sim-physics spawn failed: {}", e)))?
    };

    let handle = SimHandle {
        shared: Arc::clone(&shared),
        world: Arc::clone(&world),
    };

    log::info!(
        "SIM: Simulated chassis ready (tick {}ms, seed {})",
        config.tick_ms,
        config.seed
    );

    Ok((
        DeviceHandles {
            drive: Box::new(SimDrive {
                shared: Arc::clone(&shared),
            }),
            sensors: Box::new(SimSensors {
                shared: Arc::clone(&shared),
                world: Arc::clone(&world),
                echo: None,
            }),
            head: Box::new(SimHead { shared }),
            pulses: PulseTaps {
                left: left_rx,
                right: right_rx,
            },
            supervisor: DeviceSupervisor::new(shutdown, vec![physics]),
        },
        handle,
    ))
}

struct SimDrive {
    shared: Arc<SimShared>,
}

impl DriveControl for SimDrive {
    fn set_track(&mut self, side: TrackSide, drive: TrackDrive) -> Result<()> {
        log::trace!("SIM: set_track {} {:?}", side.name(), drive);
        let cell = match side {
            TrackSide::Left => &self.shared.left_drive,
            TrackSide::Right => &self.shared.right_drive,
        };
        cell.store(drive as u8, Ordering::Relaxed);
        Ok(())
    }

    fn set_speed_counts(&mut self, left: u8, right: u8) -> Result<()> {
        self.shared.left_count.store(left, Ordering::Relaxed);
        self.shared.right_count.store(right, Ordering::Relaxed);
        Ok(())
    }

    fn set_drive_power(&mut self, on: bool) -> Result<()> {
        log::debug!("SIM: drive power {}", if on { "on" } else { "off" });
        self.shared.drive_power.store(on, Ordering::Relaxed);
        Ok(())
    }

    fn set_pulse_sense(&mut self, on: bool) -> Result<()> {
        self.shared.pulse_sense.store(on, Ordering::Relaxed);
        Ok(())
    }
}

struct SimSensors {
    shared: Arc<SimShared>,
    world: Arc<Mutex<SimWorld>>,
    /// Pending measurement: trigger time plus the echo that will come back
    echo: Option<(Instant, Option<u16>)>,
}

impl AnalogSensors for SimSensors {
    fn read_infrared(&mut self) -> Result<u16> {
        let angle = self.shared.head_angle.load(Ordering::Relaxed);
        let w = self.world.lock();
        Ok(w.ir_overrides.get(&angle).copied().unwrap_or(w.ir_surface))
    }

    fn trigger_ultrasonic(&mut self) -> Result<()> {
        let range = self.world.lock().us_mm;
        self.echo = Some((Instant::now(), range));
        Ok(())
    }

    fn poll_ultrasonic(&mut self) -> Result<Option<u16>> {
        match self.echo {
            Some((at, Some(mm))) if at.elapsed() >= ECHO_DELAY => Ok(Some(mm)),
            _ => Ok(None),
        }
    }

    fn read_gyro(&mut self) -> Result<i32> {
        Ok(self.shared.gyro_now.load(Ordering::Relaxed))
    }

    fn read_light(&mut self) -> Result<u16> {
        let heading = self.shared.heading_deg.load(Ordering::Relaxed);
        let head = self.shared.head_angle.load(Ordering::Relaxed) as f32;
        // Positive head angles aim right of the chassis, against CCW
        let look = heading - head;
        let w = self.world.lock();
        Ok(physics::light_at(look, w.light_ambient, w.light_source))
    }

    fn read_tilt(&mut self) -> Result<bool> {
        Ok(self.world.lock().tilt)
    }
}

struct SimHead {
    shared: Arc<SimShared>,
}

impl HeadServo for SimHead {
    fn set_angle(&mut self, degrees: i8) -> Result<()> {
        if !(-90..=90).contains(&degrees) {
            return Err(Error::InvalidParameter(format!(
                "head angle {} out of range",
                degrees
            )));
        }
        self.shared.head_angle.store(degrees, Ordering::Relaxed);
        Ok(())
    }

    fn park_arms(&mut self) -> Result<()> {
        log::debug!("SIM: arms parked");
        Ok(())
    }
}
