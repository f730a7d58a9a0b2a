//! Differential track kinematics and the physics loop.
//!
//! The loop turns commanded bridge state (H-bridge directions, duty counts,
//! power and sense gates) into encoder pulses, chassis pose and a live gyro
//! sample, at a fixed tick. Pose follows plain differential-drive
//! kinematics with the left/right track speeds derived from the duty
//! counts.

use super::noise::NoiseGenerator;
use super::{SimShared, SimWorld};
use crate::config::SimConfig;
use crate::core::bridge::PulseForwarder;
use crate::core::types::TrackDrive;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Resting bias of the simulated gyro channel, counts. Offset calibration
/// in the integrator has to measure and remove this.
pub(super) const GYRO_BIAS_COUNTS: f32 = 40.0;

/// Signed pulse rate for one track in pulses per second.
///
/// Zero when the drive stage is unpowered, the bridge is in fast-stop, the
/// duty count is zero or the track is jammed against something.
fn track_rate(power: bool, drive: TrackDrive, count: u8, jammed: bool, config: &SimConfig) -> f32 {
    if !power || jammed || count == 0 {
        return 0.0;
    }
    let rate = config.pulse_rate_per_count * count as f32;
    match drive {
        TrackDrive::Forward => rate,
        TrackDrive::Reverse => -rate,
        TrackDrive::FastStop => 0.0,
    }
}

/// Normalize an angle to [-180, 180)
pub(super) fn normalize_deg(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    } else if a < -180.0 {
        a += 360.0;
    }
    a
}

/// Light level seen when looking along `look_dir` (world degrees, CCW
/// positive). The source contributes linearly within 90 degrees of the
/// look direction.
pub(super) fn light_at(look_dir: f32, ambient: u16, source: Option<(f32, u16)>) -> u16 {
    match source {
        None => ambient,
        Some((bearing, peak)) => {
            let delta = normalize_deg(bearing - look_dir).abs();
            let factor = (1.0 - delta / 90.0).max(0.0);
            ambient.saturating_add((peak as f32 * factor) as u16)
        }
    }
}

pub(super) fn physics_loop(
    config: SimConfig,
    shared: Arc<SimShared>,
    world: Arc<Mutex<SimWorld>>,
    shutdown: Arc<AtomicBool>,
    mut left_fw: PulseForwarder,
    mut right_fw: PulseForwarder,
    mut noise: NoiseGenerator,
) {
    let tick = Duration::from_millis(config.tick_ms.max(1));
    log::info!("SIM: Physics loop started (tick {:?})", tick);

    let mut left_acc: f32 = 0.0;
    let mut right_acc: f32 = 0.0;
    let mut heading: f32 = 0.0; // degrees, CCW positive, unbounded
    let mut x: f32 = 0.0;
    let mut y: f32 = 0.0;
    let mut last = Instant::now();

    loop {
        let cycle_start = Instant::now();

        if shutdown.load(Ordering::Relaxed) {
            log::info!("SIM: Physics loop shutting down");
            break;
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        // Commanded bridge state
        let power = shared.drive_power.load(Ordering::Relaxed);
        let sense = shared.pulse_sense.load(Ordering::Relaxed);
        let left_drive = TrackDrive::from_u8(shared.left_drive.load(Ordering::Relaxed));
        let right_drive = TrackDrive::from_u8(shared.right_drive.load(Ordering::Relaxed));
        let left_count = shared.left_count.load(Ordering::Relaxed);
        let right_count = shared.right_count.load(Ordering::Relaxed);

        let (jam_left, jam_right) = {
            let w = world.lock();
            (w.jam_left, w.jam_right)
        };

        let rate_left = track_rate(power, left_drive, left_count, jam_left, &config);
        let rate_right = track_rate(power, right_drive, right_count, jam_right, &config);

        // Encoder pulses: fractional accumulation, whole edges posted only
        // while the transoptors are enabled
        left_acc += rate_left.abs() * dt;
        right_acc += rate_right.abs() * dt;
        let left_whole = left_acc.trunc() as u16;
        let right_whole = right_acc.trunc() as u16;
        left_acc = left_acc.fract();
        right_acc = right_acc.fract();
        if sense {
            if left_whole > 0 {
                left_fw.push(left_whole);
            }
            if right_whole > 0 {
                right_fw.push(right_whole);
            }
        }
        left_fw.flush();
        right_fw.flush();

        // Pose integration
        let v_left = rate_left * config.pulse_cm;
        let v_right = rate_right * config.pulse_cm;
        let omega_deg = ((v_right - v_left) / config.track_width_cm).to_degrees();
        heading += omega_deg * dt;
        let v = 0.5 * (v_left + v_right);
        x += v * heading.to_radians().cos() * dt;
        y += v * heading.to_radians().sin() * dt;

        shared.heading_deg.store(heading, Ordering::Relaxed);
        shared.pos_x.store(x, Ordering::Relaxed);
        shared.pos_y.store(y, Ordering::Relaxed);

        // Live gyro sample
        let gyro =
            GYRO_BIAS_COUNTS + config.gyro_scale * omega_deg + noise.gaussian(config.gyro_noise_stddev);
        shared.gyro_now.store(gyro.round() as i32, Ordering::Relaxed);

        let elapsed = cycle_start.elapsed();
        if elapsed < tick {
            thread::sleep(tick - elapsed);
        } else if elapsed > tick * 4 {
            log::warn!("SIM: Physics tick overrun: {:?} (target: {:?})", elapsed, tick);
        }
    }

    log::info!("SIM: Physics loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig::default()
    }

    #[test]
    fn test_track_rate_gating() {
        let cfg = config();
        // Powered forward at count 200: 0.125 * 200 = 25 pulses/s
        let rate = track_rate(true, TrackDrive::Forward, 200, false, &cfg);
        assert!((rate - 25.0).abs() < 1e-6);
        // Reverse is negative
        let rate = track_rate(true, TrackDrive::Reverse, 200, false, &cfg);
        assert!((rate + 25.0).abs() < 1e-6);
        // Power off, fast-stop, zero count and jam all kill the rate
        assert_eq!(track_rate(false, TrackDrive::Forward, 200, false, &cfg), 0.0);
        assert_eq!(track_rate(true, TrackDrive::FastStop, 200, false, &cfg), 0.0);
        assert_eq!(track_rate(true, TrackDrive::Forward, 0, false, &cfg), 0.0);
        assert_eq!(track_rate(true, TrackDrive::Forward, 200, true, &cfg), 0.0);
    }

    #[test]
    fn test_normalize_deg() {
        assert_eq!(normalize_deg(0.0), 0.0);
        assert_eq!(normalize_deg(90.0), 90.0);
        assert_eq!(normalize_deg(-90.0), -90.0);
        assert_eq!(normalize_deg(360.0), 0.0);
        assert_eq!(normalize_deg(180.0), -180.0);
        assert_eq!(normalize_deg(270.0), -90.0);
        assert_eq!(normalize_deg(-270.0), 90.0);
    }

    #[test]
    fn test_light_falloff() {
        // No source: ambient only
        assert_eq!(light_at(0.0, 30, None), 30);
        // Looking straight at the source
        assert_eq!(light_at(0.0, 30, Some((0.0, 600))), 630);
        // 45 degrees off: half the peak
        assert_eq!(light_at(45.0, 30, Some((0.0, 600))), 330);
        // Beyond 90 degrees: ambient only
        assert_eq!(light_at(120.0, 30, Some((0.0, 600))), 30);
        // Wrap-around: looking at -170 for a source at 170 is 20 degrees off
        let wrapped = light_at(-170.0, 30, Some((170.0, 600)));
        assert!(wrapped > 400, "wrapped={}", wrapped);
    }
}
