//! Multi-phase speed profile for one move.
//!
//! A profile is a set of pulse-count thresholds over the up-counting total
//! distance plus three per-track duty pairs. It is computed once per move
//! and stays immutable until the move ends. Phase evaluation runs on every
//! primary-track pulse and compares the total against the thresholds
//! stop-first: `end_low` (move complete), then `end_mid` (final low band),
//! `end_high` (final mid band), `start_high`, `start_mid`; anything below
//! `start_mid` is still in the opening low band.
//!
//! Thresholds a profile kind does not use are parked at a sentinel the total
//! can never reach, so the same evaluation order serves every kind.

use crate::config::DriveConfig;
use crate::core::types::{ProfileKind, SpeedPhase};

/// Threshold value that never triggers
const DISABLED: u16 = u16::MAX;

/// Speed profile for one move: phase thresholds plus per-phase duty counts.
///
/// Duty counts are asymmetric per track to compensate gearbox tolerance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedProfile {
    start_mid: u16,
    start_high: u16,
    end_high: u16,
    end_mid: u16,
    end_low: u16,
    low: (u8, u8),
    mid: (u8, u8),
    high: (u8, u8),
}

impl SpeedProfile {
    /// Build the profile for a move of `total_target` pulses.
    ///
    /// Ramp bands that do not fit a short move saturate toward the end
    /// thresholds; the stop-first evaluation order keeps the result safe
    /// (the move simply starts in a later, slower phase).
    pub fn compute(kind: ProfileKind, total_target: u16, cfg: &DriveConfig) -> Self {
        let low_ramp = cfg.low_ramp_pulses;
        let mid_ramp = cfg.mid_ramp_pulses;
        let t = total_target;

        let (start_mid, start_high, end_high, end_mid) = match kind {
            ProfileKind::LowMidHigh => (
                low_ramp,
                low_ramp.saturating_add(mid_ramp),
                t.saturating_sub(low_ramp.saturating_add(mid_ramp)),
                t.saturating_sub(low_ramp),
            ),
            ProfileKind::LowMid => (low_ramp, DISABLED, DISABLED, t.saturating_sub(low_ramp)),
            ProfileKind::Low => (DISABLED, DISABLED, DISABLED, DISABLED),
            ProfileKind::Mid => (0, DISABLED, DISABLED, DISABLED),
            ProfileKind::High => (0, 0, DISABLED, DISABLED),
        };

        Self {
            start_mid,
            start_high,
            end_high,
            end_mid,
            end_low: t,
            low: (cfg.low_count_left, cfg.low_count_right),
            mid: (cfg.mid_count_left, cfg.mid_count_right),
            high: (cfg.high_count_left, cfg.high_count_right),
        }
    }

    /// Phase for a given total distance count.
    ///
    /// Returns `Off` once the total reaches `end_low`; callers advance the
    /// live phase only forward, so an `Off` result here never regresses the
    /// state machine. The explicit stop path stores `Off` itself.
    pub fn phase_for(&self, total: u16) -> SpeedPhase {
        if total >= self.end_low {
            SpeedPhase::Off
        } else if total >= self.end_mid {
            SpeedPhase::LowEnd
        } else if total >= self.end_high {
            SpeedPhase::MidEnd
        } else if total >= self.start_high {
            SpeedPhase::HighStart
        } else if total >= self.start_mid {
            SpeedPhase::MidStart
        } else {
            SpeedPhase::LowStart
        }
    }

    /// Duty counts (left, right) for a phase; `None` when stopped
    pub fn counts_for(&self, phase: SpeedPhase) -> Option<(u8, u8)> {
        match phase {
            SpeedPhase::LowStart | SpeedPhase::LowEnd => Some(self.low),
            SpeedPhase::MidStart | SpeedPhase::MidEnd => Some(self.mid),
            SpeedPhase::HighStart => Some(self.high),
            SpeedPhase::Off => None,
        }
    }
}
