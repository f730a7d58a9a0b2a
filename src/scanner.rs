//! Head sweep: building the obstacle grid and the light table
//!
//! The distance sensors and the light sensor share the pan head, so one
//! sweep serves both. The head visits the eight side angles from -60 to
//! +60 degrees and finishes at center, which leaves the head forward for
//! the move that usually follows. Every stop records a light reading; the
//! distance classification depends on the position:
//!
//! - center: ultrasonic and infrared fused through the lookup table
//! - inner angles (15/30/45 either side): infrared only, mapped to grid
//!   sectors by angle and severity
//! - outer angles (60 either side): light only, too oblique for distance
//!
//! Severity picks the sector band: an immediate hazard (very short or
//! chasm) marks the near cell for that bearing, a short contact marks the
//! far band behind it. Far and surface readings mark nothing.

use crate::config::Config;
use crate::core::bridge::{SharedHead, SharedSensors};
use crate::core::types::{LightScanTable, ObstacleGrid, ObstacleReading, Sector, SCAN_ANGLES};
use crate::error::Result;
use crate::fusion::DistanceFusion;

use std::thread;
use std::time::Duration;

pub struct HeadScanner {
    sensors: SharedSensors,
    head: SharedHead,
    fusion: DistanceFusion,
    settle: Duration,
}

impl HeadScanner {
    pub fn new(sensors: SharedSensors, head: SharedHead, config: &Config) -> Self {
        Self {
            sensors,
            head,
            fusion: DistanceFusion::new(&config.sensors),
            settle: Duration::from_millis(config.scanner.settle_ms),
        }
    }

    /// Full sweep: obstacle grid plus light table.
    ///
    /// The grid is rebuilt from scratch; nothing carries over from
    /// earlier sweeps. The head ends centered.
    pub fn scan(&self) -> Result<(ObstacleGrid, LightScanTable)> {
        let mut grid = ObstacleGrid::new();
        let mut lights = LightScanTable::new();

        for (i, &angle) in SCAN_ANGLES.iter().enumerate() {
            self.point_head(angle)?;
            lights.set(i, self.sensors.lock().read_light()?);

            let reading = if angle == 0 {
                self.classify_center()?
            } else if angle.abs() < 60 {
                let raw = self.sensors.lock().read_infrared()?;
                self.fusion.classify_infrared(raw)
            } else {
                // Outer positions see past the grid edge
                continue;
            };
            for &sector in cells_for(angle, reading) {
                grid.mark(sector);
            }
            log::trace!("SCAN: {:+} deg -> {:?}", angle, reading);
        }

        log::debug!("SCAN: grid after sweep\n{}", grid);
        Ok((grid, lights))
    }

    /// Sweep the light sensor only, skipping all distance reads.
    ///
    /// Used when sampling brightness at several chassis facings, where
    /// obstacle data from a stale position would be misleading anyway.
    pub fn sweep_light(&self) -> Result<LightScanTable> {
        let mut lights = LightScanTable::new();
        for (i, &angle) in SCAN_ANGLES.iter().enumerate() {
            self.point_head(angle)?;
            lights.set(i, self.sensors.lock().read_light()?);
        }
        Ok(lights)
    }

    fn point_head(&self, angle: i8) -> Result<()> {
        self.head.lock().set_angle(angle)?;
        thread::sleep(self.settle);
        Ok(())
    }

    fn classify_center(&self) -> Result<ObstacleReading> {
        let us_raw = self.fusion.read_ultrasonic_raw(&self.sensors)?;
        let ir_raw = self.sensors.lock().read_infrared()?;
        let us = self.fusion.classify_ultrasonic(us_raw);
        let ir = self.fusion.classify_infrared(ir_raw);
        let fused = crate::fusion::fuse(us, ir);
        log::debug!(
            "SCAN: center us {} ({:?}) ir {} ({:?}) -> {:?}",
            us_raw,
            us,
            ir_raw,
            ir,
            fused
        );
        Ok(fused)
    }
}

/// Sectors to mark for a classified reading at one head angle.
///
/// Negative angles look left. An immediate hazard lands in the near band,
/// a short contact in the band behind it; at 15 degrees off center a short
/// contact straddles two far cells.
fn cells_for(angle: i8, reading: ObstacleReading) -> &'static [Sector] {
    let hazard = reading.is_immediate_hazard();
    let short = reading == ObstacleReading::Short;
    match angle {
        0 | -15 | 15 if hazard => &[Sector::E],
        0 if short => &[Sector::B],
        -15 if short => &[Sector::A, Sector::B],
        15 if short => &[Sector::B, Sector::C],
        -30 if hazard => &[Sector::D],
        -30 if short => &[Sector::A],
        30 if hazard => &[Sector::F],
        30 if short => &[Sector::C],
        -45 if hazard => &[Sector::G],
        -45 if short => &[Sector::D],
        45 if hazard => &[Sector::I],
        45 if short => &[Sector::F],
        _ => &[],
    }
}
