//! Motion commander: the public command surface
//!
//! Every command here is synchronous and terminal: it sequences the track
//! engine, gyro integrator, scanner and planner, then returns exactly one
//! [`MoveOutcome`] plus the distance covered in pulses. Failure is data,
//! not an error; `Err` is reserved for transport and device faults.
//!
//! Commands busy-poll with a fixed per-iteration sleep rather than
//! spinning, and every iteration feeds a stall watch that compares the
//! per-track remaining counters against the previous poll. The stall
//! verdict always wins over any other diagnosis: a turn that stalls
//! reports `BreakLeft`/`BreakRight` even if the angle also fell short.

use crate::config::Config;
use crate::core::bridge::{
    DeviceHandles, DeviceSupervisor, SharedDrive, SharedHead, SharedSensors,
};
use crate::core::types::{
    LightScanTable, MoveOutcome, MoveReport, ObstacleGrid, ProfileKind, TrackDirection,
};
use crate::devices;
use crate::error::Result;
use crate::fusion::{fuse, DistanceFusion};
use crate::gyro::GyroIntegrator;
use crate::planner::{self, PathMask, PathStep};
use crate::scanner::HeadScanner;
use crate::tracks::TrackEngine;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Turns smaller than this are treated as already done
const MIN_TURN_DEG: f32 = 2.0;

/// Absolute chassis facing relative to where a surround scan started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Forward,
    Left,
    Reverse,
    Right,
}

impl Facing {
    pub const ALL: [Facing; 4] = [Facing::Forward, Facing::Left, Facing::Reverse, Facing::Right];

    /// Index into the surround scan table array
    pub fn index(self) -> usize {
        match self {
            Facing::Forward => 0,
            Facing::Left => 1,
            Facing::Reverse => 2,
            Facing::Right => 3,
        }
    }
}

/// Watches the per-track remaining counters for a freeze.
///
/// Counters belonging to a finished track are ignored; a move where no
/// active counter changes for a whole window of polls is stalled. Torn
/// reads are harmless since only "changed at all" matters.
struct StallWatch {
    last: (u16, u16),
    polls: u32,
    window: u32,
}

impl StallWatch {
    fn new(window: u32) -> Self {
        Self {
            last: (u16::MAX, u16::MAX),
            polls: 0,
            window,
        }
    }

    /// Feed one poll; true once the stall window is exhausted
    fn observe(&mut self, remaining: (u16, u16), active: (bool, bool)) -> bool {
        let changed = (active.0 && remaining.0 != self.last.0)
            || (active.1 && remaining.1 != self.last.1);
        self.last = remaining;
        if changed {
            self.polls = 0;
            return false;
        }
        self.polls += 1;
        self.polls >= self.window
    }
}

/// The engine's command API, consumed by the autonomous behavior layer
pub struct MotionCommander {
    config: Config,
    // Declared before the engine so its sampler disarms while the track
    // tasks are still able to accept the final stop
    gyro: GyroIntegrator,
    engine: Arc<TrackEngine>,
    scanner: HeadScanner,
    fusion: DistanceFusion,
    sensors: SharedSensors,
    head: SharedHead,
    rng: SmallRng,
    _supervisor: DeviceSupervisor,
}

impl MotionCommander {
    /// Build the whole engine stack on the device named in `config`
    pub fn new(config: Config) -> Result<Self> {
        let handles = devices::create_device(&config)?;
        Self::with_handles(config, handles)
    }

    /// Build the engine stack on an already-created device
    pub fn with_handles(config: Config, handles: DeviceHandles) -> Result<Self> {
        let drive: SharedDrive = Arc::new(Mutex::new(handles.drive));
        let sensors: SharedSensors = Arc::new(Mutex::new(handles.sensors));
        let head: SharedHead = Arc::new(Mutex::new(handles.head));

        let engine = Arc::new(TrackEngine::new(drive, handles.pulses, &config.drive)?);
        let gyro = GyroIntegrator::new(Arc::clone(&sensors), Arc::clone(&engine), &config.gyro)?;
        let scanner = HeadScanner::new(Arc::clone(&sensors), Arc::clone(&head), &config);
        let fusion = DistanceFusion::new(&config.sensors);
        let rng = if config.sim.seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(config.sim.seed)
        };

        Ok(Self {
            config,
            gyro,
            engine,
            scanner,
            fusion,
            sensors,
            head,
            rng,
            _supervisor: handles.supervisor,
        })
    }

    /// Straight move over `pulses` encoder ticks.
    ///
    /// Forward moves run the fused obstacle check and the tilt check every
    /// poll; reverse moves check tilt only, with an extra delay so pulse
    /// progress stays observable between checks.
    pub fn move_straight(
        &self,
        direction: TrackDirection,
        pulses: u16,
        kind: ProfileKind,
    ) -> Result<MoveReport> {
        if pulses == 0 {
            return Ok(MoveReport::ok(0));
        }
        log::info!("CMD: move {:?} x{} ({:?})", direction, pulses, kind);
        {
            let mut head = self.head.lock();
            head.park_arms()?;
            head.set_angle(0)?;
        }
        self.engine
            .start_move(direction, pulses, direction, pulses, kind)?;

        let forward = direction == TrackDirection::Forward;
        let poll = Duration::from_millis(self.config.drive.poll_interval_ms);
        let reverse_extra = Duration::from_millis(self.config.drive.reverse_extra_delay_ms);
        let mut watch = StallWatch::new(self.config.drive.stall_window);

        loop {
            thread::sleep(poll);
            if !forward {
                thread::sleep(reverse_extra);
            }
            if !self.engine.is_moving() {
                let covered = self.engine.total_pulses();
                log::info!("CMD: move complete, covered {}", covered);
                return Ok(MoveReport::ok(covered));
            }

            if forward && self.forward_hazard()? {
                self.engine.stop()?;
                return Ok(MoveReport::failed(
                    MoveOutcome::BreakObstacle,
                    self.engine.total_pulses(),
                ));
            }
            if self.sensors.lock().read_tilt()? {
                self.engine.stop()?;
                log::warn!("CMD: tilt during move");
                return Ok(MoveReport::failed(
                    MoveOutcome::BreakObstacle,
                    self.engine.total_pulses(),
                ));
            }

            if watch.observe(self.engine.remaining_pair(), self.engine.active_pair()) {
                self.engine.stop()?;
                let outcome = if forward {
                    MoveOutcome::BreakForward
                } else {
                    MoveOutcome::BreakReverse
                };
                log::warn!("CMD: stall, remaining {:?}", self.engine.remaining_pair());
                return Ok(MoveReport::failed(outcome, self.engine.total_pulses()));
            }
        }
    }

    pub fn turn_left(&self, degrees: f32) -> Result<MoveReport> {
        self.turn_to_angle(degrees.abs())
    }

    pub fn turn_right(&self, degrees: f32) -> Result<MoveReport> {
        self.turn_to_angle(-degrees.abs())
    }

    /// Closed-loop turn by a signed angle, positive to the left.
    ///
    /// The gyro integrator cuts the move at the target angle; the pulse
    /// budget of twice the nominal per-90-degree allotment is the fallback
    /// for a gyro that never gets there. A stall verdict is returned ahead
    /// of any angle comparison.
    pub fn turn_to_angle(&self, degrees: f32) -> Result<MoveReport> {
        if degrees.abs() < MIN_TURN_DEG {
            return Ok(MoveReport::ok(0));
        }
        let left_turn = degrees > 0.0;
        let scale = degrees.abs() / 90.0;
        let target = if left_turn {
            (self.config.gyro.counts_90_left as f32 * scale).round() as i32
        } else {
            -((self.config.gyro.counts_90_right as f32 * scale).round() as i32)
        };
        let allotment = (2.0 * f32::from(self.config.drive.turn_pulses_90) * scale).round() as u16;
        log::info!(
            "CMD: turn {:+.1} deg, target {} counts, allotment {} pulses",
            degrees,
            target,
            allotment
        );

        self.gyro.calibrate_offset()?;
        self.gyro.start_integration(target);
        let (left_dir, right_dir) = if left_turn {
            (TrackDirection::Reverse, TrackDirection::Forward)
        } else {
            (TrackDirection::Forward, TrackDirection::Reverse)
        };
        self.engine
            .start_move(left_dir, allotment, right_dir, allotment, ProfileKind::High)?;

        let poll = Duration::from_millis(self.config.drive.poll_interval_ms);
        let mut watch = StallWatch::new(self.config.drive.stall_window);
        let stalled = loop {
            thread::sleep(poll);
            if !self.engine.is_moving() {
                break false;
            }
            if watch.observe(self.engine.remaining_pair(), self.engine.active_pair()) {
                break true;
            }
        };
        let achieved = self.gyro.stop_integration();
        let covered = self.engine.total_pulses();

        if stalled {
            self.engine.stop()?;
            let outcome = if left_turn {
                MoveOutcome::BreakLeft
            } else {
                MoveOutcome::BreakRight
            };
            log::warn!("CMD: turn stalled at {} of {} counts", achieved, target);
            return Ok(MoveReport::failed(outcome, covered));
        }

        if angle_reached(achieved, target) {
            log::info!("CMD: turn done at {} counts", achieved);
            Ok(MoveReport::ok(covered))
        } else {
            let outcome = if left_turn {
                MoveOutcome::AngleLeftMissed
            } else {
                MoveOutcome::AngleRightMissed
            };
            log::warn!("CMD: turn missed, {} of {} counts", achieved, target);
            Ok(MoveReport::failed(outcome, covered))
        }
    }

    /// One full head sweep: obstacle grid plus light table
    pub fn scan_obstacles_and_light(&self) -> Result<(ObstacleGrid, LightScanTable)> {
        self.scanner.scan()
    }

    /// One light-only head sweep at the current facing
    pub fn scan_light(&self) -> Result<LightScanTable> {
        self.scanner.sweep_light()
    }

    /// Sweep the light sensor at all four facings.
    ///
    /// Turns a full circle in a randomly chosen direction, sweeping before
    /// each 90-degree turn; the fourth turn restores the starting facing.
    /// A turn failure aborts the round immediately: the outcome names the
    /// failed turn and the facings not yet visited stay `None`.
    pub fn scan_light_surroundings(
        &mut self,
    ) -> Result<(MoveOutcome, [Option<LightScanTable>; 4])> {
        let mut tables: [Option<LightScanTable>; 4] = [None; 4];
        let leftward: bool = self.rng.gen();
        log::info!(
            "CMD: light surroundings, rotating {}",
            if leftward { "left" } else { "right" }
        );
        let order: [Facing; 4] = if leftward {
            [Facing::Forward, Facing::Left, Facing::Reverse, Facing::Right]
        } else {
            [Facing::Forward, Facing::Right, Facing::Reverse, Facing::Left]
        };

        for facing in order {
            tables[facing.index()] = Some(self.scanner.sweep_light()?);
            let report = if leftward {
                self.turn_left(90.0)?
            } else {
                self.turn_right(90.0)?
            };
            if !report.outcome.is_ok() {
                log::warn!(
                    "CMD: surround scan aborted after {:?}: {:?}",
                    facing,
                    report.outcome
                );
                return Ok((report.outcome, tables));
            }
        }
        Ok((MoveOutcome::Ok, tables))
    }

    /// Face the brightest direction seen across a full surround scan.
    ///
    /// Re-orients with the minimum number of 90-degree turns toward the
    /// winning facing, then a residual fine turn centers the exact sweep
    /// bearing. `NoLightSource` when nothing beat the significance
    /// threshold.
    pub fn find_max_light_source(&mut self) -> Result<MoveReport> {
        let (outcome, tables) = self.scan_light_surroundings()?;
        if outcome != MoveOutcome::Ok {
            return Ok(MoveReport::failed(outcome, 0));
        }

        let mut best: Option<(Facing, usize, u16)> = None;
        for facing in Facing::ALL {
            if let Some(table) = &tables[facing.index()] {
                let (entry, value) = table.max_entry();
                if best.map_or(true, |(_, _, b)| value > b) {
                    best = Some((facing, entry, value));
                }
            }
        }
        let (facing, entry, value) = match best {
            Some(b) => b,
            None => return Ok(MoveReport::failed(MoveOutcome::NoLightSource, 0)),
        };
        if value <= self.config.sensors.light_significance {
            log::info!(
                "CMD: brightest {} at {:?} below significance {}",
                value,
                facing,
                self.config.sensors.light_significance
            );
            return Ok(MoveReport::failed(MoveOutcome::NoLightSource, 0));
        }

        // The head saw the maximum at this angle; the chassis turn that
        // centers it has the opposite sign
        let fine = -f32::from(LightScanTable::angle_at(entry));
        log::info!(
            "CMD: brightest {} at {:?}, fine angle {:+.0}",
            value,
            facing,
            fine
        );

        let mut covered: u16 = 0;
        let coarse = match facing {
            Facing::Forward => MoveReport::ok(0),
            Facing::Left => self.turn_left(90.0)?,
            Facing::Right => self.turn_right(90.0)?,
            Facing::Reverse => {
                // Two turns; go the way the fine angle leans so the
                // residual shrinks instead of growing
                let first = if fine >= 0.0 {
                    self.turn_left(90.0)?
                } else {
                    self.turn_right(90.0)?
                };
                if !first.outcome.is_ok() {
                    return Ok(first);
                }
                covered = covered.saturating_add(first.covered);
                if fine >= 0.0 {
                    self.turn_left(90.0)?
                } else {
                    self.turn_right(90.0)?
                }
            }
        };
        covered = covered.saturating_add(coarse.covered);
        if !coarse.outcome.is_ok() {
            return Ok(MoveReport::failed(coarse.outcome, covered));
        }

        let fine_report = self.turn_to_angle(fine)?;
        covered = covered.saturating_add(fine_report.covered);
        Ok(MoveReport {
            outcome: fine_report.outcome,
            covered,
        })
    }

    /// Face the brightest direction, then advance one sector toward it
    pub fn position_at_max_light_forward(&mut self) -> Result<MoveReport> {
        let report = self.find_max_light_source()?;
        if !report.outcome.is_ok() {
            return Ok(report);
        }
        self.move_straight(
            TrackDirection::Forward,
            self.config.drive.pulses_per_sector,
            ProfileKind::LowMid,
        )
    }

    /// Scan, pick a traversable path at random and drive it.
    ///
    /// `allowed` masks out path templates the caller has ruled out, such
    /// as the direction a previous attempt just failed in. Straight
    /// segments accumulate into the covered distance; turns do not. A
    /// failed step aborts the rest of the path and reports how far the
    /// chassis actually got.
    pub fn move_on_random_path(&mut self, distance: u16, allowed: PathMask) -> Result<MoveReport> {
        let (grid, _) = self.scanner.scan()?;
        let mask = planner::enumerate_paths(&grid);
        let path = match planner::select_path(mask, allowed, &mut self.rng) {
            Some(id) => id,
            None => {
                log::info!(
                    "PLAN: no traversable path (open {:#05x}, allowed {:#05x})",
                    mask,
                    allowed
                );
                return Ok(MoveReport::failed(MoveOutcome::NoPathFound, 0));
            }
        };
        let steps = planner::expand_path(path, distance, self.config.drive.pulses_per_sector);
        log::info!("PLAN: path {} selected, {} steps", path, steps.len());

        let mut covered: u16 = 0;
        for step in steps {
            let report = match step {
                PathStep::Forward(p) => {
                    self.move_straight(TrackDirection::Forward, p, ProfileKind::LowMidHigh)?
                }
                PathStep::Reverse(p) => {
                    self.move_straight(TrackDirection::Reverse, p, ProfileKind::LowMid)?
                }
                PathStep::TurnLeft => self.turn_left(90.0)?,
                PathStep::TurnRight => self.turn_right(90.0)?,
            };
            if matches!(step, PathStep::Forward(_) | PathStep::Reverse(_)) {
                covered = covered.saturating_add(report.covered);
            }
            if !report.outcome.is_ok() {
                log::warn!("PLAN: path {} aborted: {:?}", path, report.outcome);
                return Ok(MoveReport::failed(report.outcome, covered));
            }
        }
        log::info!("PLAN: path {} complete, covered {}", path, covered);
        Ok(MoveReport::ok(covered))
    }

    /// Pulse equivalent of one 30 cm sector
    pub fn pulses_per_sector(&self) -> u16 {
        self.config.drive.pulses_per_sector
    }

    fn forward_hazard(&self) -> Result<bool> {
        // Ultrasonic first: near-field hits show up there fastest
        let us_raw = self.fusion.read_ultrasonic_raw(&self.sensors)?;
        let us = self.fusion.classify_ultrasonic(us_raw);
        if us.is_immediate_hazard() {
            log::warn!("CMD: ultrasonic hazard {:?} at {} mm", us, us_raw);
            return Ok(true);
        }
        let ir_raw = self.sensors.lock().read_infrared()?;
        let ir = self.fusion.classify_infrared(ir_raw);
        let fused = fuse(us, ir);
        if fused.is_immediate_hazard() {
            log::warn!("CMD: hazard {:?} (us {:?}, ir {:?})", fused, us, ir);
            return Ok(true);
        }
        Ok(false)
    }
}

fn angle_reached(achieved: i32, target: i32) -> bool {
    if target > 0 {
        achieved >= target
    } else {
        achieved <= target
    }
}
