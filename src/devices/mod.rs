//! Device backends
//!
//! Each backend builds the same [`DeviceHandles`] set, so the motion and
//! planning layers never know which chassis they run on:
//! - `tr60`: the serial TR-60 motor bridge on real hardware
//! - `sim`: a physics loop with a scriptable world, for tests and desks

pub mod sim;
pub mod tr60;

use crate::config::Config;
use crate::core::bridge::DeviceHandles;
use crate::error::{Error, Result};

/// Create the device named by `config.device.type`
pub fn create_device(config: &Config) -> Result<DeviceHandles> {
    log::info!("Creating device: {}", config.device.device_type);
    match config.device.device_type.as_str() {
        "tr60" => tr60::create(&config.device),
        "sim" => sim::create(&config.sim).map(|(handles, _)| handles),
        other => Err(Error::UnknownDevice(other.to_string())),
    }
}
