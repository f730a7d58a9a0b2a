//! Closed-loop pivot turns: gyro cutoff accuracy, stall precedence,
//! and the missed-angle verdict when the integral never arrives.

mod common;

use approx::assert_abs_diff_eq;
use chakra_drive::MoveOutcome;
use chakra_drive::core::types::TrackSide;

#[test]
fn left_turn_stops_near_ninety_degrees() {
    let rig = common::rig(11);
    let report = rig.commander.turn_left(90.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(report.covered > 5, "turn consumed {} pulses", report.covered);
    assert_abs_diff_eq!(rig.sim.heading_degrees(), 90.0, epsilon = 9.0);
}

#[test]
fn right_turn_stops_near_minus_ninety_degrees() {
    let rig = common::rig(12);
    let report = rig.commander.turn_right(90.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert_abs_diff_eq!(rig.sim.heading_degrees(), -90.0, epsilon = 9.0);
}

#[test]
fn partial_angle_scales_the_target() {
    let rig = common::rig(13);
    let report = rig.commander.turn_to_angle(45.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert_abs_diff_eq!(rig.sim.heading_degrees(), 45.0, epsilon = 8.0);
}

#[test]
fn tiny_angle_is_a_no_op() {
    let rig = common::rig(14);
    let report = rig.commander.turn_to_angle(1.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert_eq!(report.covered, 0);
    assert!(rig.sim.heading_degrees().abs() < 0.5);
}

#[test]
fn jammed_turn_reports_stall_not_missed_angle() {
    let rig = common::rig(15);
    rig.sim.set_jam(TrackSide::Left, true);
    rig.sim.set_jam(TrackSide::Right, true);
    let report = rig.commander.turn_left(90.0).unwrap();
    // The watchdog verdict must win over the angle comparison
    assert_eq!(report.outcome, MoveOutcome::BreakLeft);
    assert_eq!(report.covered, 0);
}

#[test]
fn jammed_right_turn_reports_right_stall() {
    let rig = common::rig(16);
    rig.sim.set_jam(TrackSide::Left, true);
    rig.sim.set_jam(TrackSide::Right, true);
    let report = rig.commander.turn_right(90.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakRight);
}

#[test]
fn weak_gyro_exhausts_pulses_and_misses_the_angle() {
    // A detuned rate channel integrates far too slowly for the target,
    // so the pulse allotment runs out first
    let rig = common::rig_with(17, |config| {
        config.sim.gyro_scale = 0.05;
    });
    let report = rig.commander.turn_left(90.0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::AngleLeftMissed);
    assert!(report.covered >= 55, "allotment was {} pulses", report.covered);
}
