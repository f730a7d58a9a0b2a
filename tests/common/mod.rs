//! Shared test rig: the full commander stack on the simulated chassis
#![allow(dead_code)]

use chakra_drive::commander::MotionCommander;
use chakra_drive::config::Config;
use chakra_drive::devices::sim::{self, SimHandle};

pub struct Rig {
    pub commander: MotionCommander,
    pub sim: SimHandle,
}

/// TR-60 calibration on the simulator, deterministic, with the servo
/// settle shortened so full sweeps stay fast
pub fn test_config(seed: u64) -> Config {
    let mut config = Config::tr60_defaults();
    config.device.device_type = "sim".to_string();
    config.device.name = "bench".to_string();
    config.sim.seed = seed;
    config.scanner.settle_ms = 5;
    config
}

pub fn rig(seed: u64) -> Rig {
    rig_with(seed, |_| {})
}

pub fn rig_with(seed: u64, tweak: impl FnOnce(&mut Config)) -> Rig {
    let mut config = test_config(seed);
    tweak(&mut config);
    let (handles, sim) = sim::create(&config.sim).expect("sim device");
    let commander = MotionCommander::with_handles(config, handles).expect("commander");
    Rig { commander, sim }
}

/// Wrap an unbounded heading into [-180, 180)
pub fn norm_deg(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    }
    if a < -180.0 {
        a += 360.0;
    }
    a
}
