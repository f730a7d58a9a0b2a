//! Straight-line motion against the simulated chassis: completion,
//! hazard breaks, and the stall watchdog.

mod common;

use chakra_drive::{MoveOutcome, ProfileKind, TrackDirection};
use chakra_drive::core::types::TrackSide;

#[test]
fn forward_move_covers_requested_pulses() {
    let rig = common::rig(1);
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 24, ProfileKind::LowMidHigh)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(
        (24..=28).contains(&report.covered),
        "covered {} pulses",
        report.covered
    );
    let (x, _, _) = rig.sim.pose();
    assert!(x > 12.0, "barely moved: x = {x:.1} cm");
}

#[test]
fn reverse_move_backs_away() {
    let rig = common::rig(2);
    let report = rig
        .commander
        .move_straight(TrackDirection::Reverse, 20, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    let (x, _, _) = rig.sim.pose();
    assert!(x < -10.0, "expected reverse travel, x = {x:.1} cm");
}

#[test]
fn ultrasonic_wall_breaks_forward_move() {
    let rig = common::rig(3);
    rig.sim.set_ultrasonic(Some(100));
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 40, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakObstacle);
    assert!(report.covered < 10, "should break early, covered {}", report.covered);
}

#[test]
fn chasm_under_the_nose_breaks_forward_move() {
    let rig = common::rig(4);
    // Readings this weak mean the floor dropped away
    rig.sim.set_ir_at(0, 5);
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 40, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakObstacle);
}

#[test]
fn strong_infrared_reflection_breaks_forward_move() {
    let rig = common::rig(5);
    rig.sim.set_ir_at(0, 720);
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 40, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakObstacle);
}

#[test]
fn reverse_move_ignores_range_sensors() {
    let rig = common::rig(6);
    rig.sim.set_ultrasonic(Some(100));
    rig.sim.set_ir_at(0, 720);
    let report = rig
        .commander
        .move_straight(TrackDirection::Reverse, 15, ProfileKind::Low)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
}

#[test]
fn tilt_breaks_moves_in_both_directions() {
    let rig = common::rig(7);
    rig.sim.set_tilt(true);
    let forward = rig
        .commander
        .move_straight(TrackDirection::Forward, 40, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(forward.outcome, MoveOutcome::BreakObstacle);

    let reverse = rig
        .commander
        .move_straight(TrackDirection::Reverse, 40, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(reverse.outcome, MoveOutcome::BreakObstacle);
}

#[test]
fn jammed_tracks_trip_the_forward_watchdog() {
    let rig = common::rig(8);
    rig.sim.set_jam(TrackSide::Left, true);
    rig.sim.set_jam(TrackSide::Right, true);
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 30, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakForward);
    assert_eq!(report.covered, 0);
}

#[test]
fn jammed_tracks_trip_the_reverse_watchdog() {
    let rig = common::rig(9);
    rig.sim.set_jam(TrackSide::Left, true);
    rig.sim.set_jam(TrackSide::Right, true);
    let report = rig
        .commander
        .move_straight(TrackDirection::Reverse, 30, ProfileKind::LowMid)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::BreakReverse);
}

#[test]
fn zero_pulse_move_is_a_no_op() {
    let rig = common::rig(10);
    let report = rig
        .commander
        .move_straight(TrackDirection::Forward, 0, ProfileKind::Low)
        .unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert_eq!(report.covered, 0);
    let (x, _, _) = rig.sim.pose();
    assert!(x.abs() < 0.5);
}
