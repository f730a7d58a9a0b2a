//! Closed-loop turn measurement from the raw gyro channel
//!
//! The bridge exposes the gyro as a raw count with a large resting bias.
//! Calibration averages that bias out while the chassis is still; during a
//! turn a 10 ms sampler accumulates the offset-relative samples with an
//! unnormalized trapezoid: each step adds the new sample plus the previous
//! one, with no division by two. The per-90-degree count constants absorb
//! that factor, so they are roughly `2 * scale * 90 / period` and are
//! calibrated per direction on real hardware.
//!
//! While armed with a nonzero target the sampler stops the track engine on
//! its own the moment the integral passes the target in the target's own
//! direction. That keeps the cut latency at one sample period instead of
//! one command poll interval.

use crate::config::GyroConfig;
use crate::core::bridge::SharedSensors;
use crate::error::{Error, Result};
use crate::tracks::TrackEngine;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct GyroShared {
    offset: AtomicI32,
    integrated: AtomicI32,
    target: AtomicI32,
    armed: AtomicBool,
    shutdown: AtomicBool,
}

/// Background gyro sampler with on-target autonomous stop
pub struct GyroIntegrator {
    config: GyroConfig,
    sensors: SharedSensors,
    shared: Arc<GyroShared>,
    thread: Option<JoinHandle<()>>,
}

impl GyroIntegrator {
    pub fn new(
        sensors: SharedSensors,
        tracks: Arc<TrackEngine>,
        config: &GyroConfig,
    ) -> Result<Self> {
        let shared = Arc::new(GyroShared {
            offset: AtomicI32::new(0),
            integrated: AtomicI32::new(0),
            target: AtomicI32::new(0),
            armed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let thread = {
            let config = config.clone();
            let sensors = Arc::clone(&sensors);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("gyro-sampler".to_string())
                .spawn(move || sampler_loop(config, sensors, tracks, shared))
                .map_err(|e| Error::Thread(format!("gyro sampler spawn failed: {}", e)))?
        };

        Ok(Self {
            config: config.clone(),
            sensors,
            shared,
            thread: Some(thread),
        })
    }

    /// Measure the resting bias while the chassis is still.
    ///
    /// Holds the sensor handle for the whole run so no other reader can
    /// interleave; at the default settings that is about 128 ms.
    pub fn calibrate_offset(&self) -> Result<i32> {
        let samples = self.config.calibration_samples.max(1);
        let spacing = Duration::from_millis(self.config.calibration_spacing_ms);
        let mut sum: i64 = 0;
        {
            let mut sensors = self.sensors.lock();
            for i in 0..samples {
                sum += i64::from(sensors.read_gyro()?);
                if i + 1 < samples {
                    thread::sleep(spacing);
                }
            }
        }
        let offset = (sum as f64 / f64::from(samples)).round() as i32;
        self.shared.offset.store(offset, Ordering::Relaxed);
        log::debug!("GYRO: offset calibrated to {} over {} samples", offset, samples);
        Ok(offset)
    }

    /// Arm the integrator with a signed target.
    ///
    /// Left turns integrate positive, right turns negative. A target of
    /// zero integrates without ever stopping the move.
    pub fn start_integration(&self, target: i32) {
        self.shared.integrated.store(0, Ordering::Relaxed);
        self.shared.target.store(target, Ordering::Relaxed);
        self.shared.armed.store(true, Ordering::Relaxed);
        log::debug!("GYRO: integration armed, target {}", target);
    }

    /// Disarm and return the final integral
    pub fn stop_integration(&self) -> i32 {
        self.shared.armed.store(false, Ordering::Relaxed);
        self.shared.integrated.load(Ordering::Relaxed)
    }

    /// False once the sampler has cut the move at its target
    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Relaxed)
    }

    pub fn offset(&self) -> i32 {
        self.shared.offset.load(Ordering::Relaxed)
    }
}

impl Drop for GyroIntegrator {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("GYRO: sampler thread panicked");
            }
        }
    }
}

fn sampler_loop(
    config: GyroConfig,
    sensors: SharedSensors,
    tracks: Arc<TrackEngine>,
    shared: Arc<GyroShared>,
) {
    let period = Duration::from_millis(config.sample_period_ms.max(1));
    let mut prev: i32 = 0;
    let mut was_armed = false;

    loop {
        let cycle_start = Instant::now();
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let armed = shared.armed.load(Ordering::Relaxed);
        if armed {
            if !was_armed {
                prev = 0;
            }
            let sample = sensors.lock().read_gyro();
            match sample {
                Ok(raw) => {
                    let mut n = raw - shared.offset.load(Ordering::Relaxed);
                    if n.abs() < config.noise_gate {
                        n = 0;
                    }
                    let sum = shared.integrated.fetch_add(n + prev, Ordering::Relaxed) + n + prev;
                    prev = n;

                    // Sign-aware: a turn integrating the wrong way never
                    // satisfies its target, leaving the stall watchdog as
                    // the effective timeout
                    let target = shared.target.load(Ordering::Relaxed);
                    let reached = match target.cmp(&0) {
                        std::cmp::Ordering::Greater => sum >= target,
                        std::cmp::Ordering::Less => sum <= target,
                        std::cmp::Ordering::Equal => false,
                    };
                    if reached {
                        shared.armed.store(false, Ordering::Relaxed);
                        log::debug!("GYRO: target {} reached at {}", target, sum);
                        if let Err(e) = tracks.stop() {
                            log::warn!("GYRO: stop at target failed: {}", e);
                        }
                    }
                }
                Err(e) => log::warn!("GYRO: sample failed: {}", e),
            }
        }
        was_armed = armed;

        let elapsed = cycle_start.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        }
    }
    log::debug!("GYRO: sampler exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::bridge::{DeviceSupervisor, SharedDrive};
    use crate::core::types::{ProfileKind, TrackDirection};
    use crate::devices::sim::{self, SimHandle};
    use parking_lot::Mutex;

    struct Rig {
        engine: Arc<TrackEngine>,
        gyro: GyroIntegrator,
        sim: SimHandle,
        _sup: DeviceSupervisor,
    }

    fn rig() -> Rig {
        let config = Config::tr60_defaults();
        let (handles, sim) = sim::create(&config.sim).unwrap();
        let drive: SharedDrive = Arc::new(Mutex::new(handles.drive));
        let sensors: SharedSensors = Arc::new(Mutex::new(handles.sensors));
        let engine =
            Arc::new(TrackEngine::new(drive, handles.pulses, &config.drive).unwrap());
        let gyro =
            GyroIntegrator::new(sensors, Arc::clone(&engine), &config.gyro).unwrap();
        Rig {
            engine,
            gyro,
            sim,
            _sup: handles.supervisor,
        }
    }

    #[test]
    fn test_calibration_finds_resting_bias() {
        let rig = rig();
        let offset = rig.gyro.calibrate_offset().unwrap();
        assert!((38..=42).contains(&offset), "offset={}", offset);
        assert_eq!(rig.gyro.offset(), offset);
    }

    #[test]
    fn test_noise_gate_holds_integral_at_rest() {
        let rig = rig();
        rig.gyro.calibrate_offset().unwrap();
        rig.gyro.start_integration(0);
        thread::sleep(Duration::from_millis(300));
        let value = rig.gyro.stop_integration();
        assert!(value.abs() < 50, "integral drifted to {}", value);
    }

    #[test]
    fn test_target_stops_pivot_near_ninety_degrees() {
        let rig = rig();
        rig.gyro.calibrate_offset().unwrap();

        rig.gyro.start_integration(7200);
        rig.engine
            .start_move(
                TrackDirection::Reverse,
                60,
                TrackDirection::Forward,
                60,
                ProfileKind::High,
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while rig.engine.is_moving() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!rig.engine.is_moving(), "pivot never stopped");

        let integral = rig.gyro.stop_integration();
        assert!(integral >= 7200, "integral={}", integral);
        assert!(!rig.gyro.is_armed());

        let heading = rig.sim.heading_degrees();
        assert!(
            (82.0..=98.0).contains(&heading),
            "heading={} after gyro cut",
            heading
        );
    }
}
