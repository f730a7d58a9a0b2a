//! Configuration for the chakra-drive engine
//!
//! Loads configuration from a TOML file. Every calibration constant the
//! engine consumes lives here: speed counts, profile ramp lengths, gyro
//! 90-degree counts, sensor thresholds. The defaults match the reference
//! TR-60 chassis and are suitable for the simulator.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub drive: DriveConfig,
    pub gyro: GyroConfig,
    pub sensors: SensorsConfig,
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Device selection and transport parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Device driver to load: "tr60" (serial bridge) or "sim"
    #[serde(rename = "type")]
    pub device_type: String,
    /// Human-readable chassis name, used in logs only
    pub name: String,
    /// Bridge MCU serial port (tr60 only)
    pub serial_port: String,
    /// Serial baud rate (tr60 only)
    pub baud_rate: u32,
}

/// Track drive calibration.
///
/// Speed counts are per-track and asymmetric on purpose: the two gearboxes
/// never run at exactly the same rate, and the per-side values compensate
/// the measured difference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriveConfig {
    /// Duty counts for the low phase
    pub low_count_left: u8,
    pub low_count_right: u8,
    /// Duty counts for the mid phase
    pub mid_count_left: u8,
    pub mid_count_right: u8,
    /// Duty counts for the high phase
    pub high_count_left: u8,
    pub high_count_right: u8,
    /// Pulses spent in each low ramp band
    pub low_ramp_pulses: u16,
    /// Pulses spent in each mid ramp band
    pub mid_ramp_pulses: u16,
    /// Delay between enabling motor outputs and enabling the transoptors
    pub stabilization_ms: u64,
    /// Encoder pulses per 30 cm grid sector
    pub pulses_per_sector: u16,
    /// Encoder pulses one track covers during a 90-degree pivot
    pub turn_pulses_90: u16,
    /// Poll loop sleep while a move is in progress
    pub poll_interval_ms: u64,
    /// Extra delay per iteration on reverse moves so pulse progress is
    /// observable between checks
    pub reverse_extra_delay_ms: u64,
    /// Consecutive unchanged-poll cycles before a stall is declared
    pub stall_window: u32,
}

/// Rate-gyro integrator calibration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GyroConfig {
    /// Sampler period in milliseconds
    pub sample_period_ms: u64,
    /// Offset-relative samples below this magnitude are treated as zero
    pub noise_gate: i32,
    /// Integrated counts for a full 90-degree left turn.
    ///
    /// The integrator accumulates the sum of each sample pair without
    /// dividing by two, so these constants carry that factor. Re-deriving
    /// them requires the same unnormalized integration.
    pub counts_90_left: i32,
    /// Integrated counts for a full 90-degree right turn (stored positive)
    pub counts_90_right: i32,
    /// Samples averaged during offset calibration
    pub calibration_samples: u32,
    /// Spacing between calibration samples
    pub calibration_spacing_ms: u64,
}

/// Distance and light sensor calibration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorsConfig {
    pub infrared: InfraredConfig,
    pub ultrasonic: UltrasonicConfig,
    /// Minimum raw light value considered a real source
    pub light_significance: u16,
}

/// Infrared reflectance classifier thresholds, raw ADC counts.
///
/// Reflectance grows as the obstacle gets closer; readings above `short_max`
/// classify as `VeryShort`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfraredConfig {
    /// Below this the sensor sees no floor at all: chasm
    pub chasm_max: u16,
    /// Below this only the floor reflects: surface
    pub surface_max: u16,
    /// Below this an obstacle sits in the far band
    pub far_max: u16,
    /// Below this an obstacle sits within one sector
    pub short_max: u16,
}

/// Ultrasonic classifier thresholds, millimeters.
///
/// Readings at or beyond `far_max_mm` (including the no-echo sentinel)
/// classify as `Surface`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UltrasonicConfig {
    /// Below this the echo is implausibly early (transducer ringing)
    pub near_zero_max_mm: u16,
    pub very_short_max_mm: u16,
    pub short_max_mm: u16,
    pub far_max_mm: u16,
    /// Completion polls before the measurement times out
    pub poll_budget: u32,
    /// Sleep between completion polls
    pub poll_interval_ms: u64,
}

/// Head sweep parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Servo settle time after each head move
    pub settle_ms: u64,
}

/// Simulator tuning (ignored by the tr60 device)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// RNG seed for sensor noise; 0 draws from entropy
    pub seed: u64,
    /// Encoder pulses per second per duty count
    pub pulse_rate_per_count: f32,
    /// Track travel per encoder pulse, centimeters
    pub pulse_cm: f32,
    /// Distance between track centers, centimeters
    pub track_width_cm: f32,
    /// Gyro counts per degree-per-second of chassis rotation
    pub gyro_scale: f32,
    /// Gaussian noise on the gyro channel, counts
    pub gyro_noise_stddev: f32,
    /// Physics tick, milliseconds
    pub tick_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            pulse_rate_per_count: 0.125,
            pulse_cm: 0.8,
            track_width_cm: 14.0,
            gyro_scale: 0.4,
            gyro_noise_stddev: 1.5,
            tick_ms: 2,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default calibration for the reference TR-60 chassis
    pub fn tr60_defaults() -> Self {
        Self {
            device: DeviceConfig {
                device_type: "tr60".to_string(),
                name: "TR-60".to_string(),
                serial_port: "/dev/ttyS2".to_string(),
                baud_rate: 115_200,
            },
            drive: DriveConfig {
                low_count_left: 60,
                low_count_right: 58,
                mid_count_left: 120,
                mid_count_right: 117,
                high_count_left: 200,
                high_count_right: 196,
                low_ramp_pulses: 4,
                mid_ramp_pulses: 8,
                stabilization_ms: 60,
                pulses_per_sector: 36,
                turn_pulses_90: 30,
                poll_interval_ms: 40,
                reverse_extra_delay_ms: 60,
                stall_window: 5,
            },
            gyro: GyroConfig {
                sample_period_ms: 10,
                noise_gate: 6,
                counts_90_left: 7200,
                counts_90_right: 7150,
                calibration_samples: 32,
                calibration_spacing_ms: 4,
            },
            sensors: SensorsConfig {
                infrared: InfraredConfig {
                    chasm_max: 12,
                    surface_max: 180,
                    far_max: 420,
                    short_max: 700,
                },
                ultrasonic: UltrasonicConfig {
                    near_zero_max_mm: 20,
                    very_short_max_mm: 150,
                    short_max_mm: 300,
                    far_max_mm: 600,
                    poll_budget: 20,
                    poll_interval_ms: 2,
                },
                light_significance: 120,
            },
            scanner: ScannerConfig { settle_ms: 120 },
            sim: SimConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::tr60_defaults()
    }
}
