//! ChakraDrive - track motion control and obstacle-aware path planning
//!
//! This library is the control core of a small tracked robot: it turns
//! "move N pulses" and "turn 90 degrees" requests into pulse-timed motor
//! control, fuses two distance sensors into an obstacle grid, and picks
//! among twelve predefined escape paths when the way ahead is blocked.
//!
//! Layers, bottom up:
//!
//! - [`transport`] / [`devices`]: serial TR-60 motor bridge, or a
//!   simulated chassis with a scriptable world
//! - [`tracks`]: per-track pulse tasks and the speed profile state machine
//! - [`gyro`]: offset-calibrated turn integration with autonomous cutoff
//! - [`fusion`] / [`scanner`]: sensor classification and the head sweep
//! - [`planner`]: path enumeration and weighted random selection
//! - [`commander`]: the synchronous command surface tying it all together

pub mod commander;
pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod fusion;
pub mod gyro;
pub mod planner;
pub mod scanner;
pub mod tracks;
pub mod transport;

// Re-export commonly used types
pub use commander::MotionCommander;
pub use config::Config;
pub use core::types::{MoveOutcome, MoveReport, ProfileKind, TrackDirection};
pub use error::{Error, Result};
