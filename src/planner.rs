//! Path planning over the 3x3 sector grid.
//!
//! Twelve predefined multi-segment path templates route the robot around a
//! partially blocked grid:
//!
//! ```text
//!        A | B | C     far band
//!       ---+---+---
//!        D | E | F     near band
//!       ---+---+---
//!        G | H | I     robot row, H is the robot
//! ```
//!
//! Each template names the cells that must be clear plus the segment
//! sequence to drive. Templates are not mutually exclusive: 1/7, 4/8 and
//! 5/9 alias the same physical motion at within-sector vs. through-sector
//! length, so selection can fall back to the shorter, safer variant when
//! the far band is blocked.
//!
//! Selection walks fixed priority groups; a group holding two candidates
//! resolves by a uniform coin flip from an injected rng, which keeps the
//! precedence rules testable in isolation from the random source.

use crate::core::types::{ObstacleGrid, Sector};
use rand::Rng;

/// Bitmask of traversable path templates; bit n = path n+1
pub type PathMask = u16;

/// Mask with every path template allowed
pub const ALL_PATHS: PathMask = 0x0FFF;

/// Mask bit for a path id (1..=12)
pub fn path_bit(id: u8) -> PathMask {
    1 << (id - 1)
}

/// Segment length selector, resolved against the requested distance and the
/// sector length at expansion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    /// `min(distance, one sector)`
    UpToSector,
    /// Exactly one sector, regardless of the requested distance
    FullSector,
    /// `min(distance, two sectors)`
    UpToTwoSectors,
}

/// Template-level segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Forward(Span),
    Reverse(Span),
    TurnLeft,
    TurnRight,
}

/// Expanded, executable step of a selected path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep {
    /// Drive forward this many pulses
    Forward(u16),
    /// Drive backward this many pulses
    Reverse(u16),
    TurnLeft,
    TurnRight,
}

struct PathTemplate {
    id: u8,
    required: &'static [Sector],
    segments: &'static [Segment],
}

use Sector::{A, B, C, D, E, F, G, I};
use Segment::{Forward, Reverse, TurnLeft, TurnRight};
use Span::{FullSector, UpToSector, UpToTwoSectors};

const TEMPLATES: [PathTemplate; 12] = [
    // 1: straight ahead, stay within the visible sector
    PathTemplate {
        id: 1,
        required: &[E],
        segments: &[Forward(UpToSector)],
    },
    // 2: ahead then bear left toward D
    PathTemplate {
        id: 2,
        required: &[E, D],
        segments: &[Forward(UpToSector), TurnLeft],
    },
    // 3: ahead then bear right toward F
    PathTemplate {
        id: 3,
        required: &[E, F],
        segments: &[Forward(UpToSector), TurnRight],
    },
    // 4: sidestep one sector left, then ahead within the sector
    PathTemplate {
        id: 4,
        required: &[G, D],
        segments: &[
            TurnLeft,
            Forward(FullSector),
            TurnRight,
            Forward(UpToSector),
        ],
    },
    // 5: sidestep one sector right, then ahead within the sector
    PathTemplate {
        id: 5,
        required: &[I, F],
        segments: &[
            TurnRight,
            Forward(FullSector),
            TurnLeft,
            Forward(UpToSector),
        ],
    },
    // 6: back out of the current sector; always available
    PathTemplate {
        id: 6,
        required: &[],
        segments: &[Reverse(UpToSector)],
    },
    // 7: straight ahead, through to the next sector
    PathTemplate {
        id: 7,
        required: &[E, B],
        segments: &[Forward(UpToTwoSectors)],
    },
    // 8: sidestep left, then through to the next sector
    PathTemplate {
        id: 8,
        required: &[G, D, A],
        segments: &[
            TurnLeft,
            Forward(FullSector),
            TurnRight,
            Forward(UpToTwoSectors),
        ],
    },
    // 9: sidestep right, then through to the next sector
    PathTemplate {
        id: 9,
        required: &[I, F, C],
        segments: &[
            TurnRight,
            Forward(FullSector),
            TurnLeft,
            Forward(UpToTwoSectors),
        ],
    },
    // 10: swing left into the flank sector
    PathTemplate {
        id: 10,
        required: &[G],
        segments: &[TurnLeft, Forward(UpToSector)],
    },
    // 11: swing right into the flank sector
    PathTemplate {
        id: 11,
        required: &[I],
        segments: &[TurnRight, Forward(UpToSector)],
    },
    // 12: turn around and leave; always available
    PathTemplate {
        id: 12,
        required: &[],
        segments: &[TurnLeft, TurnLeft, Forward(UpToSector)],
    },
];

/// Selection precedence: longest straight routes first, then the through
/// sidesteps, then the short variants, then flank swings, with the escape
/// moves (reverse, turn-around) last. Two-entry groups are the coin-flip
/// decision points.
const PRIORITY_GROUPS: [&[u8]; 8] = [
    &[7],
    &[8, 9],
    &[1],
    &[4, 5],
    &[2, 3],
    &[10, 11],
    &[6],
    &[12],
];

/// Evaluate all twelve templates against a grid.
///
/// A template's bit is set when every required cell is clear. Paths 6 and
/// 12 require no cells and are always set.
pub fn enumerate_paths(grid: &ObstacleGrid) -> PathMask {
    let mut mask: PathMask = 0;
    for template in &TEMPLATES {
        if template.required.iter().all(|&cell| grid.is_clear(cell)) {
            mask |= path_bit(template.id);
        }
    }
    mask
}

/// Pick one path from `mask & allowed`, or `None` when the masked set is
/// empty. Walks the priority groups in order; the first group with any
/// candidate wins, and a group holding both of its paths resolves with a
/// uniform coin flip.
pub fn select_path<R: Rng>(mask: PathMask, allowed: PathMask, rng: &mut R) -> Option<u8> {
    let candidates = mask & allowed & ALL_PATHS;
    if candidates == 0 {
        return None;
    }
    for group in PRIORITY_GROUPS {
        let present: Vec<u8> = group
            .iter()
            .copied()
            .filter(|&id| candidates & path_bit(id) != 0)
            .collect();
        match present.as_slice() {
            [] => continue,
            [only] => return Some(*only),
            [first, second] => {
                let pick = if rng.gen_range(0..2) == 0 {
                    *first
                } else {
                    *second
                };
                return Some(pick);
            }
            _ => unreachable!("priority groups hold at most two paths"),
        }
    }
    None
}

/// Expand a selected path into executable steps.
///
/// `distance` is the caller's requested forward distance in pulses and
/// `sector_pulses` the length of one 30 cm sector. `id` must be a value
/// returned by [`select_path`].
pub fn expand_path(id: u8, distance: u16, sector_pulses: u16) -> Vec<PathStep> {
    debug_assert!((1..=12).contains(&id));
    let template = &TEMPLATES[(id - 1) as usize];
    template
        .segments
        .iter()
        .map(|segment| match segment {
            Forward(span) => PathStep::Forward(resolve_span(*span, distance, sector_pulses)),
            Reverse(span) => PathStep::Reverse(resolve_span(*span, distance, sector_pulses)),
            TurnLeft => PathStep::TurnLeft,
            TurnRight => PathStep::TurnRight,
        })
        .collect()
}

fn resolve_span(span: Span, distance: u16, sector_pulses: u16) -> u16 {
    match span {
        Span::UpToSector => distance.min(sector_pulses),
        Span::FullSector => sector_pulses,
        Span::UpToTwoSectors => distance.min(sector_pulses.saturating_mul(2)),
    }
}
