//! Hardware seam between the motion engine and a concrete device.
//!
//! A device (the TR-60 serial bridge or the simulator) hands the engine three
//! handle objects plus the two pulse-event receivers. Each handle guards one
//! shared hardware resource:
//!
//! - [`DriveControl`]: the H-bridge / PWM stage (one mutex in the engine)
//! - [`AnalogSensors`]: the single ADC (one mutex in the engine)
//! - [`HeadServo`]: the head and arm servo stage (its own mutex)
//!
//! Pulse events are the only push-style input: the device posts each edge
//! into a capacity-1 mailbox per track and never blocks doing so.

use crate::core::types::{PulseEvent, TrackDrive, TrackSide};
use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Motor driver interface: H-bridge states, duty registers, power rails.
pub trait DriveControl: Send {
    /// Set one track's H-bridge state (forward / reverse / fast-stop)
    fn set_track(&mut self, side: TrackSide, drive: TrackDrive) -> Result<()>;

    /// Program the per-track speed-count (duty) registers
    fn set_speed_counts(&mut self, left: u8, right: u8) -> Result<()>;

    /// Enable or disable the whole drive stage
    fn set_drive_power(&mut self, on: bool) -> Result<()>;

    /// Enable or disable the pulse-sensing transoptors
    fn set_pulse_sense(&mut self, on: bool) -> Result<()>;
}

/// Shared-ADC sensor channels plus the tilt switch.
pub trait AnalogSensors: Send {
    /// Raw infrared reflectance counts at the current head angle
    fn read_infrared(&mut self) -> Result<u16>;

    /// Start an edge-timed ultrasonic echo measurement
    fn trigger_ultrasonic(&mut self) -> Result<()>;

    /// Completed echo distance in millimeters, or `None` while still waiting
    fn poll_ultrasonic(&mut self) -> Result<Option<u16>>;

    /// Raw rate-gyro counts
    fn read_gyro(&mut self) -> Result<i32>;

    /// Raw light intensity at the current head angle
    fn read_light(&mut self) -> Result<u16>;

    /// Tilt switch state, `true` when the chassis is off level
    fn read_tilt(&mut self) -> Result<bool>;
}

/// Head and arm servo stage.
pub trait HeadServo: Send {
    /// Steer the sensor head; positive angles are to the robot's right
    fn set_angle(&mut self, degrees: i8) -> Result<()>;

    /// Move the arm servos to their parked position
    fn park_arms(&mut self) -> Result<()>;
}

/// Drive stage behind the engine's single PWM mutex
pub type SharedDrive = Arc<Mutex<Box<dyn DriveControl>>>;
/// ADC behind the engine's single sensor mutex
pub type SharedSensors = Arc<Mutex<Box<dyn AnalogSensors>>>;
/// Servo stage behind its own mutex
pub type SharedHead = Arc<Mutex<Box<dyn HeadServo>>>;

/// The two per-track pulse mailbox receivers
pub struct PulseTaps {
    pub left: Receiver<PulseEvent>,
    pub right: Receiver<PulseEvent>,
}

/// Device-side sender for one track's pulse mailbox.
///
/// The mailbox holds one event. When the consumer has not drained the
/// previous event, new ticks fold into a pending count instead of being
/// dropped, and [`PulseForwarder::flush`] retries delivery.
pub struct PulseForwarder {
    tx: Sender<PulseEvent>,
    pending: u16,
}

impl PulseForwarder {
    pub fn new(tx: Sender<PulseEvent>) -> Self {
        Self { tx, pending: 0 }
    }

    /// Add ticks and attempt delivery
    pub fn push(&mut self, ticks: u16) {
        self.pending = self.pending.saturating_add(ticks);
        self.flush();
    }

    /// Retry delivery of folded ticks
    pub fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        match self.tx.try_send(PulseEvent::new(self.pending)) {
            Ok(()) => self.pending = 0,
            Err(TrySendError::Full(_)) => {} // keep folding until the task drains it
            Err(TrySendError::Disconnected(_)) => self.pending = 0,
        }
    }
}

/// Everything a device hands to the engine at startup.
pub struct DeviceHandles {
    pub drive: Box<dyn DriveControl>,
    pub sensors: Box<dyn AnalogSensors>,
    pub head: Box<dyn HeadServo>,
    pub pulses: PulseTaps,
    /// Keeps the device's internal threads alive; dropping it shuts them down
    pub supervisor: DeviceSupervisor,
}

/// Owns a device's background threads and stops them on drop.
pub struct DeviceSupervisor {
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl DeviceSupervisor {
    pub fn new(shutdown: Arc<AtomicBool>, threads: Vec<JoinHandle<()>>) -> Self {
        Self { shutdown, threads }
    }
}

impl Drop for DeviceSupervisor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("device").to_string();
            if handle.join().is_err() {
                log::warn!("Device thread '{}' panicked during shutdown", name);
            }
        }
    }
}
