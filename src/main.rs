//! ChakraDrive - roaming daemon for the TR-60 tracked chassis
//!
//! Drives the motion engine through a simple wander behavior: pick a
//! traversable path, drive it, and steer around whatever stopped the last
//! attempt. On a blocked grid it falls back to seeking the brightest
//! direction. Runs against real hardware or the built-in simulator
//! (`--device sim`).

mod commander;
mod config;
mod core;
mod devices;
mod error;
mod fusion;
mod gyro;
mod planner;
mod scanner;
mod tracks;
mod transport;

use crate::commander::MotionCommander;
use crate::config::Config;
use crate::core::types::{MoveOutcome, ProfileKind, TrackDirection};
use crate::error::{Error, Result};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/chakra-drive.toml";

struct CliOptions {
    config_path: String,
    device: Option<String>,
}

/// Parse command line arguments.
///
/// Supports:
/// - `chakra-drive <path>` (positional config path)
/// - `chakra-drive --config <path>` / `-c <path>`
/// - `chakra-drive --device <type>` / `-d <type>` (overrides the config)
fn parse_args() -> CliOptions {
    let args: Vec<String> = env::args().collect();
    let mut config_path = None;
    let mut device = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--device" | "-d" if i + 1 < args.len() => {
                device = Some(args[i + 1].clone());
                i += 2;
            }
            arg if !arg.starts_with('-') && config_path.is_none() => {
                config_path = Some(arg.to_string());
                i += 1;
            }
            _ => i += 1,
        }
    }

    CliOptions {
        config_path: config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
        device,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("ChakraDrive v0.4.0 starting...");

    let opts = parse_args();
    let mut config = match Config::load(&opts.config_path) {
        Ok(config) => {
            log::info!("Using config: {}", opts.config_path);
            config
        }
        Err(e) => {
            log::warn!(
                "Config {} not loaded ({}), using TR-60 defaults",
                opts.config_path,
                e
            );
            Config::default()
        }
    };
    if let Some(device) = opts.device {
        config.device.device_type = device;
    }

    log::info!(
        "Device: {} ({})",
        config.device.name,
        config.device.device_type
    );

    let mut commander = MotionCommander::new(config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    roam(&mut commander, &running)
}

/// Wander behavior: random paths, steering around whatever failed last.
///
/// The allowed-path mask carries the lesson from the previous attempt: an
/// obstacle break bans the straight-ahead family for one round so the
/// next pick routes around instead of ramming the same wall.
fn roam(commander: &mut MotionCommander, running: &Arc<AtomicBool>) -> Result<()> {
    let sector = commander.pulses_per_sector();
    let straight_family = planner::path_bit(1)
        | planner::path_bit(2)
        | planner::path_bit(3)
        | planner::path_bit(7);
    let mut allowed = planner::ALL_PATHS;

    while running.load(Ordering::Relaxed) {
        let report = commander.move_on_random_path(sector * 2, allowed)?;
        match report.outcome {
            MoveOutcome::Ok => {
                allowed = planner::ALL_PATHS;
            }
            MoveOutcome::NoPathFound => {
                log::info!("Boxed in, seeking the brightest direction");
                let light = commander.find_max_light_source()?;
                if light.outcome == MoveOutcome::NoLightSource {
                    log::info!("Nothing to steer by, resting");
                    thread::sleep(Duration::from_secs(2));
                }
                allowed = planner::ALL_PATHS;
            }
            MoveOutcome::BreakObstacle => {
                log::info!("Obstacle mid-path, backing off half a sector");
                let _ = commander.move_straight(
                    TrackDirection::Reverse,
                    sector / 2,
                    ProfileKind::Low,
                )?;
                allowed = planner::ALL_PATHS & !straight_family;
            }
            outcome => {
                log::warn!("Roam step failed: {:?} (covered {})", outcome, report.covered);
                allowed = planner::ALL_PATHS;
                thread::sleep(Duration::from_millis(500));
            }
        }
    }

    log::info!("ChakraDrive stopped");
    Ok(())
}
