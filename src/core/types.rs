//! Core domain types shared across the engine.
//!
//! Key types:
//! - [`ObstacleReading`]: canonical five-class obstacle classification
//! - [`ObstacleGrid`] / [`Sector`]: the 3x3 occupancy grid built by the scanner
//! - [`MoveOutcome`] / [`MoveReport`]: terminal result of every public command

use std::fmt;
use std::time::Instant;

/// One of the two traction belts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSide {
    Left,
    Right,
}

impl TrackSide {
    /// The opposite track
    pub fn other(self) -> Self {
        match self {
            TrackSide::Left => TrackSide::Right,
            TrackSide::Right => TrackSide::Left,
        }
    }

    /// Short name for log messages
    pub fn name(self) -> &'static str {
        match self {
            TrackSide::Left => "left",
            TrackSide::Right => "right",
        }
    }
}

/// Commanded direction for a track or a straight move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDirection {
    Forward,
    Reverse,
}

/// H-bridge output state for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackDrive {
    /// Both legs low, motor coasts to a fast stop
    FastStop = 0,
    Forward = 1,
    Reverse = 2,
}

impl From<TrackDirection> for TrackDrive {
    fn from(dir: TrackDirection) -> Self {
        match dir {
            TrackDirection::Forward => TrackDrive::Forward,
            TrackDirection::Reverse => TrackDrive::Reverse,
        }
    }
}

impl TrackDrive {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TrackDrive::Forward,
            2 => TrackDrive::Reverse,
            _ => TrackDrive::FastStop,
        }
    }
}

/// One encoder edge event delivered from the pulse source to a track task.
///
/// The mailbox between producer and task holds a single event. When the slot
/// is full the producer folds the undelivered count into the next event, so
/// `ticks` may be greater than one but the pulse total is never lost.
#[derive(Debug, Clone, Copy)]
pub struct PulseEvent {
    /// Number of encoder edges this event stands for (>= 1)
    pub ticks: u16,
    /// Time the most recent edge was observed
    pub timestamp: Instant,
}

impl PulseEvent {
    pub fn new(ticks: u16) -> Self {
        Self {
            ticks,
            timestamp: Instant::now(),
        }
    }
}

/// Requested speed profile for one move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Full ramp: low -> mid -> high -> mid -> low
    LowMidHigh,
    /// Ramp capped at mid speed
    LowMid,
    /// Constant low speed
    Low,
    /// Constant mid speed
    Mid,
    /// Constant high speed (used by closed-loop turns)
    High,
}

/// Current phase of the speed profile state machine.
///
/// Transitions are monotonic forward through the profile; `Off` is entered
/// only by an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SpeedPhase {
    Off = 0,
    LowStart = 1,
    MidStart = 2,
    HighStart = 3,
    MidEnd = 4,
    LowEnd = 5,
}

impl SpeedPhase {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SpeedPhase::LowStart,
            2 => SpeedPhase::MidStart,
            3 => SpeedPhase::HighStart,
            4 => SpeedPhase::MidEnd,
            5 => SpeedPhase::LowEnd,
            _ => SpeedPhase::Off,
        }
    }
}

/// Canonical obstacle classification shared by both distance sensors and the
/// fusion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleReading {
    /// Nothing within range, or floor only
    Surface,
    /// Void or drop-off ahead (infrared sees no reflection)
    Chasm,
    /// Obstacle in the far band (beyond one sector)
    Far,
    /// Obstacle within the next sector
    Short,
    /// Obstacle immediately ahead, stop now
    VeryShort,
}

impl ObstacleReading {
    /// Table index in the canonical order used by the fusion lookup
    pub fn index(self) -> usize {
        match self {
            ObstacleReading::Surface => 0,
            ObstacleReading::Chasm => 1,
            ObstacleReading::Far => 2,
            ObstacleReading::Short => 3,
            ObstacleReading::VeryShort => 4,
        }
    }

    /// Reading for an ultrasonic class index; out-of-range values clamp to
    /// `Surface` (no echo, nothing seen).
    pub fn from_ultrasonic_index(index: u8) -> Self {
        match index {
            1 => ObstacleReading::Chasm,
            2 => ObstacleReading::Far,
            3 => ObstacleReading::Short,
            4 => ObstacleReading::VeryShort,
            _ => ObstacleReading::Surface,
        }
    }

    /// Reading for an infrared class index; out-of-range values clamp to
    /// `Short` (treat a garbled reflectance reading as an obstacle).
    pub fn from_infrared_index(index: u8) -> Self {
        match index {
            0 => ObstacleReading::Surface,
            1 => ObstacleReading::Chasm,
            2 => ObstacleReading::Far,
            4 => ObstacleReading::VeryShort,
            _ => ObstacleReading::Short,
        }
    }

    /// True for the classes that must stop a forward move immediately
    pub fn is_immediate_hazard(self) -> bool {
        matches!(self, ObstacleReading::Chasm | ObstacleReading::VeryShort)
    }
}

/// Named cell of the 3x3 sector grid around the robot.
///
/// ```text
///        A | B | C     row 2: far band, 30-60 cm ahead
///       ---+---+---
///        D | E | F     row 1: near band, 0-30 cm ahead
///       ---+---+---
///        G | H | I     row 0: robot row, H is the robot itself
/// ```
///
/// Columns run left to right from the robot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sector {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
}

impl Sector {
    /// Grid row (0 = robot row, 2 = far band)
    pub fn row(self) -> usize {
        match self {
            Sector::G | Sector::H | Sector::I => 0,
            Sector::D | Sector::E | Sector::F => 1,
            Sector::A | Sector::B | Sector::C => 2,
        }
    }

    /// Grid column (0 = left, 2 = right)
    pub fn col(self) -> usize {
        match self {
            Sector::A | Sector::D | Sector::G => 0,
            Sector::B | Sector::E | Sector::H => 1,
            Sector::C | Sector::F | Sector::I => 2,
        }
    }

    pub const ALL: [Sector; 9] = [
        Sector::A,
        Sector::B,
        Sector::C,
        Sector::D,
        Sector::E,
        Sector::F,
        Sector::G,
        Sector::H,
        Sector::I,
    ];
}

/// 3x3 occupancy grid of 30 cm sectors ahead of the robot.
///
/// `true` marks "blocked or chasm". Rebuilt from scratch on every scan and
/// never partially updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObstacleGrid {
    cells: [[bool; 3]; 3],
}

impl ObstacleGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a sector as blocked
    pub fn mark(&mut self, sector: Sector) {
        self.cells[sector.row()][sector.col()] = true;
    }

    pub fn is_blocked(&self, sector: Sector) -> bool {
        self.cells[sector.row()][sector.col()]
    }

    pub fn is_clear(&self, sector: Sector) -> bool {
        !self.is_blocked(sector)
    }

    /// Number of blocked sectors
    pub fn blocked_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&b| b).count()
    }
}

impl fmt::Display for ObstacleGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Far row on top, robot row at the bottom, matching the sector diagram
        for (i, row) in self.cells.iter().enumerate().rev() {
            for (j, &blocked) in row.iter().enumerate() {
                let mark = if i == 0 && j == 1 {
                    'R'
                } else if blocked {
                    '#'
                } else {
                    '.'
                };
                write!(f, "{}", mark)?;
                if j < 2 {
                    write!(f, " ")?;
                }
            }
            if i > 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Raw light intensities recorded during one head sweep.
///
/// Entries follow the sweep order: the eight side positions from -60 to +60
/// degrees, then the forward reading taken after the head re-centers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightScanTable {
    entries: [u16; 9],
}

/// Head angles in sweep order; the center position comes last
/// (forward-after-centering). Positive angles are to the robot's right.
pub const SCAN_ANGLES: [i8; 9] = [-60, -45, -30, -15, 15, 30, 45, 60, 0];

impl LightScanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, index: usize, value: u16) {
        self.entries[index] = value;
    }

    pub fn get(&self, index: usize) -> u16 {
        self.entries[index]
    }

    /// Head angle corresponding to an entry index
    pub fn angle_at(index: usize) -> i8 {
        SCAN_ANGLES[index]
    }

    /// Index and value of the brightest entry
    pub fn max_entry(&self) -> (usize, u16) {
        let mut best = (0, self.entries[0]);
        for (i, &v) in self.entries.iter().enumerate().skip(1) {
            if v > best.1 {
                best = (i, v);
            }
        }
        best
    }
}

/// Terminal result of every public motion command.
///
/// A command either fully succeeds (`Ok`) or returns exactly one failure
/// code; partial progress is reported separately in [`MoveReport::covered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Command completed as requested
    Ok,
    /// Pulse counters froze during a forward move
    BreakForward,
    /// Pulse counters froze during a reverse move
    BreakReverse,
    /// Obstacle, chasm, or tilt detected during a forward move
    BreakObstacle,
    /// Pulse counters froze during a left turn
    BreakLeft,
    /// Pulse counters froze during a right turn
    BreakRight,
    /// Left turn ran out of pulses before reaching the target angle
    AngleLeftMissed,
    /// Right turn ran out of pulses before reaching the target angle
    AngleRightMissed,
    /// No path template is traversable under the current grid and mask
    NoPathFound,
    /// No light reading exceeded the significance threshold
    NoLightSource,
}

impl MoveOutcome {
    pub fn is_ok(self) -> bool {
        self == MoveOutcome::Ok
    }
}

/// Outcome of a public command plus the distance actually covered, in pulses.
///
/// `covered` is always populated so a caller can compute a corrective
/// backward move after a failure mid-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveReport {
    pub outcome: MoveOutcome,
    pub covered: u16,
}

impl MoveReport {
    pub fn ok(covered: u16) -> Self {
        Self {
            outcome: MoveOutcome::Ok,
            covered,
        }
    }

    pub fn failed(outcome: MoveOutcome, covered: u16) -> Self {
        Self { outcome, covered }
    }
}
