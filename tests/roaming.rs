//! Grid-guided path selection and light seeking on the simulated chassis.
//!
//! Obstacles are scripted against head angles, so a hazard staged at -15
//! degrees blocks the center sector during the sweep while leaving the
//! straight-ahead hazard checks of later forward legs clean.

mod common;

use chakra_drive::MoveOutcome;
use chakra_drive::core::types::{LightScanTable, Sector, TrackSide};
use chakra_drive::planner::{path_bit, ALL_PATHS};

#[test]
fn clear_grid_drives_straight_through() {
    let mut rig = common::rig(21);
    let report = rig.commander.move_on_random_path(72, ALL_PATHS).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(
        (72..=78).contains(&report.covered),
        "covered {} pulses",
        report.covered
    );
    let (x, _, _) = rig.sim.pose();
    assert!(x > 40.0, "expected two sectors of travel, x = {x:.1} cm");
}

#[test]
fn blocked_center_takes_a_sidestep() {
    let mut rig = common::rig(22);
    rig.sim.set_ir_at(-15, 720);
    let report = rig.commander.move_on_random_path(72, ALL_PATHS).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    // One full-sector leg plus the two-sector run, turns not counted
    assert!(
        (108..=116).contains(&report.covered),
        "covered {} pulses",
        report.covered
    );
    let (x, _, heading) = rig.sim.pose();
    assert!(x > 40.0, "sidestep should still advance, x = {x:.1} cm");
    assert!(heading.abs() < 25.0, "should face forward again, heading {heading:.1}");
}

#[test]
fn walled_ahead_swings_into_a_flank() {
    let mut rig = common::rig(23);
    rig.sim.set_ir_at(-15, 720);
    rig.sim.set_ir_at(-30, 720);
    rig.sim.set_ir_at(30, 720);
    let report = rig.commander.move_on_random_path(72, ALL_PATHS).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(
        (36..=42).contains(&report.covered),
        "covered {} pulses",
        report.covered
    );
    let heading = common::norm_deg(rig.sim.heading_degrees()).abs();
    assert!(
        (80.0..=100.0).contains(&heading),
        "expected a quarter turn, heading magnitude {heading:.1}"
    );
}

#[test]
fn empty_mask_reports_no_path() {
    let mut rig = common::rig(24);
    let report = rig.commander.move_on_random_path(72, 0).unwrap();
    assert_eq!(report.outcome, MoveOutcome::NoPathFound);
    assert_eq!(report.covered, 0);
    let (x, _, _) = rig.sim.pose();
    assert!(x.abs() < 0.5, "robot should not have moved");
}

#[test]
fn mask_can_force_the_reverse_escape() {
    let mut rig = common::rig(25);
    let report = rig.commander.move_on_random_path(72, path_bit(6)).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    let (x, _, _) = rig.sim.pose();
    assert!(x < -20.0, "expected one sector in reverse, x = {x:.1} cm");
}

#[test]
fn mask_can_force_an_about_face() {
    let mut rig = common::rig(26);
    let report = rig.commander.move_on_random_path(72, path_bit(12)).unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(
        (36..=42).contains(&report.covered),
        "covered {} pulses",
        report.covered
    );
    let (_, _, heading) = rig.sim.pose();
    let residual = common::norm_deg(heading - 180.0).abs();
    assert!(residual < 16.0, "should face backwards, residual {residual:.1}");
}

#[test]
fn light_seeker_faces_the_brightest_bearing() {
    let mut rig = common::rig(27);
    rig.sim.set_light_source(-90.0, 600);
    let report = rig.commander.find_max_light_source().unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    let residual = common::norm_deg(rig.sim.heading_degrees() + 90.0).abs();
    assert!(residual < 15.0, "off the source bearing by {residual:.1} degrees");
}

#[test]
fn no_source_above_ambient_reports_no_light() {
    let mut rig = common::rig(28);
    let report = rig.commander.find_max_light_source().unwrap();
    assert_eq!(report.outcome, MoveOutcome::NoLightSource);
    // The survey rotation ends where it started
    let residual = common::norm_deg(rig.sim.heading_degrees()).abs();
    assert!(residual < 15.0, "survey drifted {residual:.1} degrees");
}

#[test]
fn jammed_survey_aborts_with_partial_tables() {
    let mut rig = common::rig(29);
    rig.sim.set_jam(TrackSide::Left, true);
    rig.sim.set_jam(TrackSide::Right, true);
    let (outcome, tables) = rig.commander.scan_light_surroundings().unwrap();
    assert!(
        matches!(outcome, MoveOutcome::BreakLeft | MoveOutcome::BreakRight),
        "unexpected outcome {outcome:?}"
    );
    assert!(tables[0].is_some(), "the first facing is swept before any turn");
    assert_eq!(tables.iter().filter(|t| t.is_some()).count(), 1);
}

#[test]
fn light_positioning_advances_one_sector_toward_the_source() {
    let mut rig = common::rig(30);
    rig.sim.set_light_source(0.0, 600);
    let report = rig.commander.position_at_max_light_forward().unwrap();
    assert_eq!(report.outcome, MoveOutcome::Ok);
    assert!(report.covered >= 36, "covered {} pulses", report.covered);
    let (x, _, _) = rig.sim.pose();
    assert!(x > 20.0, "expected a sector of approach, x = {x:.1} cm");
}

#[test]
fn survey_marks_scripted_hazards_in_the_grid() {
    let rig = common::rig(31);
    // Strong reflection dead ahead, floor dropout off to the left
    rig.sim.set_ir_at(-15, 720);
    rig.sim.set_ir_at(-45, 5);
    let (grid, light) = rig.commander.scan_obstacles_and_light().unwrap();
    assert!(grid.is_blocked(Sector::E));
    assert!(grid.is_blocked(Sector::G));
    assert!(grid.is_clear(Sector::F));
    assert_eq!(grid.blocked_count(), 2);
    // No scripted source, so the bundled sweep reads flat ambient
    let (_, brightest) = light.max_entry();
    assert_eq!(brightest, 30);
}

#[test]
fn single_sweep_peaks_at_the_source_bearing() {
    let rig = common::rig(32);
    // Source 45 degrees to the left; the head swings left to face it
    rig.sim.set_light_source(45.0, 600);
    let table = rig.commander.scan_light().unwrap();
    let (index, value) = table.max_entry();
    assert_eq!(LightScanTable::angle_at(index), -45);
    assert_eq!(value, 630);
    assert!(table.get(8) < value, "center must read dimmer than the peak");
}
