//! Track engine: per-track pulse tasks and the speed profile state machine
//!
//! Each track gets a long-lived task thread fed by its capacity-1 pulse
//! mailbox. A move arms both tasks with an immutable [`SpeedProfile`];
//! from then on every counted pulse decrements that track's remaining
//! budget, and pulses on the primary track (the one with the larger
//! target) additionally advance the up-counting total that drives phase
//! evaluation. Evaluation is stop-first: a track that reaches zero
//! finishes before any phase threshold is considered.
//!
//! Completion depends on the target shape:
//! - equal targets: the first track to finish performs a full stop of
//!   both tracks, pulse sensing and drive power
//! - unequal targets: a finished track fast-stops itself and the move
//!   ends when the other one finishes too
//!
//! [`TrackEngine::stop`] is idempotent and safe to call from any thread;
//! the gyro integrator uses it to cut turns at the target angle.

pub mod profile;

use crate::config::DriveConfig;
use crate::core::bridge::{PulseTaps, SharedDrive};
use crate::core::types::{ProfileKind, PulseEvent, SpeedPhase, TrackDirection, TrackDrive, TrackSide};
use crate::error::{Error, Result};
use profile::SpeedProfile;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Per-move parameters delivered to a track task when it is armed
struct MoveSpec {
    profile: SpeedProfile,
    /// Primary tracks advance the shared total and the speed phase
    primary: bool,
}

enum TaskCommand {
    Arm(MoveSpec),
    Shutdown,
}

/// Live move state shared between the two tasks and observers
struct EngineShared {
    left_remaining: AtomicU16,
    right_remaining: AtomicU16,
    /// Up-counting pulse total on the primary track
    total: AtomicU16,
    phase: AtomicU8,
    left_active: AtomicBool,
    right_active: AtomicBool,
    equal_targets: AtomicBool,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            left_remaining: AtomicU16::new(0),
            right_remaining: AtomicU16::new(0),
            total: AtomicU16::new(0),
            phase: AtomicU8::new(SpeedPhase::Off as u8),
            left_active: AtomicBool::new(false),
            right_active: AtomicBool::new(false),
            equal_targets: AtomicBool::new(true),
        }
    }

    fn remaining_cell(&self, side: TrackSide) -> &AtomicU16 {
        match side {
            TrackSide::Left => &self.left_remaining,
            TrackSide::Right => &self.right_remaining,
        }
    }

    fn active_cell(&self, side: TrackSide) -> &AtomicBool {
        match side {
            TrackSide::Left => &self.left_active,
            TrackSide::Right => &self.right_active,
        }
    }

    fn is_active(&self, side: TrackSide) -> bool {
        self.active_cell(side).load(Ordering::Relaxed)
    }
}

/// Two-track motion engine over a shared [`DriveControl`] handle.
///
/// All methods take `&self`; the engine is safe to share behind an `Arc`
/// so the gyro integrator can stop a turn autonomously.
///
/// [`DriveControl`]: crate::core::bridge::DriveControl
pub struct TrackEngine {
    drive: SharedDrive,
    config: DriveConfig,
    shared: Arc<EngineShared>,
    left_ctl: Sender<TaskCommand>,
    right_ctl: Sender<TaskCommand>,
    threads: Vec<JoinHandle<()>>,
}

impl TrackEngine {
    pub fn new(drive: SharedDrive, pulses: PulseTaps, config: &DriveConfig) -> Result<Self> {
        let shared = Arc::new(EngineShared::new());
        let (left_ctl, left_ctl_rx) = unbounded();
        let (right_ctl, right_ctl_rx) = unbounded();

        let mut threads = Vec::with_capacity(2);
        for (side, ctl_rx, pulse_rx) in [
            (TrackSide::Left, left_ctl_rx, pulses.left),
            (TrackSide::Right, right_ctl_rx, pulses.right),
        ] {
            let shared = Arc::clone(&shared);
            let drive = Arc::clone(&drive);
            let handle = thread::Builder::new()
                .name(format!("track-{}", side.name()))
                .spawn(move || task_loop(side, ctl_rx, pulse_rx, shared, drive))
                .map_err(|e| Error::Thread(format!("track task spawn failed: {}", e)))?;
            threads.push(handle);
        }

        Ok(Self {
            drive,
            config: config.clone(),
            shared,
            left_ctl,
            right_ctl,
            threads,
        })
    }

    /// Begin a move with per-track directions and pulse targets.
    ///
    /// An in-flight move is stopped first. The call returns once the
    /// drive is powered and pulse sensing is on; completion is observed
    /// through [`TrackEngine::is_moving`].
    pub fn start_move(
        &self,
        left_dir: TrackDirection,
        left_target: u16,
        right_dir: TrackDirection,
        right_target: u16,
        kind: ProfileKind,
    ) -> Result<()> {
        if self.is_moving() {
            log::warn!("TRACKS: move started while moving, stopping first");
            self.stop()?;
        }
        if left_target == 0 && right_target == 0 {
            log::debug!("TRACKS: zero-length move ignored");
            return Ok(());
        }

        let primary = if left_target >= right_target {
            TrackSide::Left
        } else {
            TrackSide::Right
        };
        let profile = SpeedProfile::compute(kind, left_target.max(right_target), &self.config);
        let start_phase = profile.phase_for(0);
        log::info!(
            "TRACKS: move left {:?} x{} right {:?} x{} ({:?}, primary {})",
            left_dir,
            left_target,
            right_dir,
            right_target,
            kind,
            primary.name()
        );

        // Shared state first, then arm, then hardware: the tasks must be
        // ready before the first pulse can arrive.
        self.shared
            .left_remaining
            .store(left_target, Ordering::Relaxed);
        self.shared
            .right_remaining
            .store(right_target, Ordering::Relaxed);
        self.shared.total.store(0, Ordering::Relaxed);
        self.shared
            .equal_targets
            .store(left_target == right_target, Ordering::Relaxed);
        self.shared.phase.store(start_phase as u8, Ordering::Relaxed);
        self.shared
            .left_active
            .store(left_target > 0, Ordering::Relaxed);
        self.shared
            .right_active
            .store(right_target > 0, Ordering::Relaxed);

        self.arm(TrackSide::Left, &profile, primary == TrackSide::Left)?;
        self.arm(TrackSide::Right, &profile, primary == TrackSide::Right)?;

        {
            let mut drive = self.drive.lock();
            let left = if left_target > 0 {
                TrackDrive::from(left_dir)
            } else {
                TrackDrive::FastStop
            };
            let right = if right_target > 0 {
                TrackDrive::from(right_dir)
            } else {
                TrackDrive::FastStop
            };
            drive.set_track(TrackSide::Left, left)?;
            drive.set_track(TrackSide::Right, right)?;
            let (cl, cr) = profile.counts_for(start_phase).unwrap_or((0, 0));
            drive.set_speed_counts(cl, cr)?;
            drive.set_drive_power(true)?;
        }

        // Let the H-bridge outputs settle before counting edges
        thread::sleep(Duration::from_millis(self.config.stabilization_ms));
        self.drive.lock().set_pulse_sense(true)?;
        Ok(())
    }

    fn arm(&self, side: TrackSide, profile: &SpeedProfile, primary: bool) -> Result<()> {
        let ctl = match side {
            TrackSide::Left => &self.left_ctl,
            TrackSide::Right => &self.right_ctl,
        };
        ctl.send(TaskCommand::Arm(MoveSpec {
            profile: profile.clone(),
            primary,
        }))
        .map_err(|_| Error::Thread(format!("track-{} task gone", side.name())))
    }

    /// Stop both tracks, pulse sensing and drive power.
    ///
    /// Idempotent; callable from any thread at any time.
    pub fn stop(&self) -> Result<()> {
        self.shared.left_active.store(false, Ordering::Relaxed);
        self.shared.right_active.store(false, Ordering::Relaxed);
        self.shared
            .phase
            .store(SpeedPhase::Off as u8, Ordering::Relaxed);
        let mut drive = self.drive.lock();
        drive.set_track(TrackSide::Left, TrackDrive::FastStop)?;
        drive.set_track(TrackSide::Right, TrackDrive::FastStop)?;
        drive.set_pulse_sense(false)?;
        drive.set_drive_power(false)?;
        Ok(())
    }

    /// True while any track still has pulses to count
    pub fn is_moving(&self) -> bool {
        self.shared.left_active.load(Ordering::Relaxed)
            || self.shared.right_active.load(Ordering::Relaxed)
    }

    pub fn remaining(&self, side: TrackSide) -> u16 {
        self.shared.remaining_cell(side).load(Ordering::Relaxed)
    }

    /// Remaining pulse budgets as (left, right), for stall detection
    pub fn remaining_pair(&self) -> (u16, u16) {
        (
            self.remaining(TrackSide::Left),
            self.remaining(TrackSide::Right),
        )
    }

    /// Active flags as (left, right); a finished track no longer counts
    pub fn active_pair(&self) -> (bool, bool) {
        (
            self.shared.is_active(TrackSide::Left),
            self.shared.is_active(TrackSide::Right),
        )
    }

    /// Pulses counted on the primary track since the move started
    pub fn total_pulses(&self) -> u16 {
        self.shared.total.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> SpeedPhase {
        SpeedPhase::from_u8(self.shared.phase.load(Ordering::Relaxed))
    }
}

impl Drop for TrackEngine {
    fn drop(&mut self) {
        let _ = self.left_ctl.send(TaskCommand::Shutdown);
        let _ = self.right_ctl.send(TaskCommand::Shutdown);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("TRACKS: task thread panicked");
            }
        }
    }
}

fn task_loop(
    side: TrackSide,
    ctl: Receiver<TaskCommand>,
    pulses: Receiver<PulseEvent>,
    shared: Arc<EngineShared>,
    drive: SharedDrive,
) {
    let mut spec: Option<MoveSpec> = None;
    loop {
        select! {
            recv(ctl) -> msg => match msg {
                Ok(TaskCommand::Arm(new_spec)) => {
                    // Drop pulses still in flight from the previous move
                    while pulses.try_recv().is_ok() {}
                    spec = Some(new_spec);
                }
                Ok(TaskCommand::Shutdown) | Err(_) => break,
            },
            recv(pulses) -> event => {
                let event = match event {
                    Ok(ev) => ev,
                    Err(_) => break,
                };
                if let Some(active) = spec.as_ref() {
                    if shared.is_active(side) {
                        handle_pulses(side, event.ticks, active, &shared, &drive);
                    }
                }
            }
        }
    }
    log::debug!("TRACKS: {} task exiting", side.name());
}

fn handle_pulses(
    side: TrackSide,
    ticks: u16,
    spec: &MoveSpec,
    shared: &EngineShared,
    drive: &SharedDrive,
) {
    let cell = shared.remaining_cell(side);
    let after = cell.load(Ordering::Relaxed).saturating_sub(ticks);
    cell.store(after, Ordering::Relaxed);

    if spec.primary {
        shared.total.fetch_add(ticks, Ordering::Relaxed);
    }

    // Stop-first: a finished track never advances the phase
    if after == 0 {
        finish(side, shared, drive);
        return;
    }
    if spec.primary {
        advance_phase(spec, shared, drive);
    }
}

fn advance_phase(spec: &MoveSpec, shared: &EngineShared, drive: &SharedDrive) {
    let total = shared.total.load(Ordering::Relaxed);
    let next = spec.profile.phase_for(total);
    let current = SpeedPhase::from_u8(shared.phase.load(Ordering::Relaxed));
    // Off orders below every running phase, so an end-of-profile result
    // can never regress the state machine here
    if next > current {
        shared.phase.store(next as u8, Ordering::Relaxed);
        if let Some((left, right)) = spec.profile.counts_for(next) {
            log::debug!("TRACKS: phase {:?} at total {}", next, total);
            log_drive_err(drive.lock().set_speed_counts(left, right), "speed counts");
        }
    }
}

fn finish(side: TrackSide, shared: &EngineShared, drive: &SharedDrive) {
    if shared.equal_targets.load(Ordering::Relaxed) {
        full_stop(shared, drive);
        log::debug!(
            "TRACKS: move complete at total {}",
            shared.total.load(Ordering::Relaxed)
        );
        return;
    }

    shared.active_cell(side).store(false, Ordering::Relaxed);
    log_drive_err(
        drive.lock().set_track(side, TrackDrive::FastStop),
        "fast stop",
    );
    log::debug!("TRACKS: {} track done", side.name());
    if !shared.is_active(side.other()) {
        full_stop(shared, drive);
    }
}

fn full_stop(shared: &EngineShared, drive: &SharedDrive) {
    shared.left_active.store(false, Ordering::Relaxed);
    shared.right_active.store(false, Ordering::Relaxed);
    shared
        .phase
        .store(SpeedPhase::Off as u8, Ordering::Relaxed);
    let mut d = drive.lock();
    log_drive_err(d.set_track(TrackSide::Left, TrackDrive::FastStop), "fast stop");
    log_drive_err(d.set_track(TrackSide::Right, TrackDrive::FastStop), "fast stop");
    log_drive_err(d.set_pulse_sense(false), "pulse sense off");
    log_drive_err(d.set_drive_power(false), "drive power off");
}

fn log_drive_err(result: Result<()>, what: &str) {
    if let Err(e) = result {
        log::warn!("TRACKS: {} failed: {}", what, e);
    }
}
