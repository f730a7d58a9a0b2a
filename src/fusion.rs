//! Distance sensor fusion.
//!
//! Two independent classifiers turn raw readings into the five-class
//! [`ObstacleReading`], and a fixed 5x5 table fuses the pair when both
//! sensors observe the same direction (the center head position). The table
//! is worst-case biased: infrared `Chasm` always wins (void below the
//! sensor), and an implausibly early ultrasonic echo degrades to `Short`
//! instead of trusting either sensor alone.

use crate::config::{InfraredConfig, SensorsConfig, UltrasonicConfig};
use crate::core::bridge::SharedSensors;
use crate::core::types::ObstacleReading;
use crate::error::Result;
use std::thread;
use std::time::Duration;

/// Sentinel distance for an echo that never arrived; classifies as `Surface`
pub const NO_ECHO: u16 = u16::MAX;

/// Fusion lookup, rows = ultrasonic class, columns = infrared class, both in
/// the canonical index order Surface, Chasm, Far, Short, VeryShort.
const FUSION_TABLE: [[ObstacleReading; 5]; 5] = {
    use ObstacleReading::{Chasm, Far, Short, Surface, VeryShort};
    [
        // us: Surface (nothing in range, or no echo) - infrared decides
        [Surface, Chasm, Far, Short, VeryShort],
        // us: Chasm (near-zero echo, usually transducer ringing) - cautious
        [Short, Chasm, Short, Short, VeryShort],
        // us: Far
        [Far, Chasm, Far, Short, VeryShort],
        // us: Short
        [Short, Chasm, Short, Short, VeryShort],
        // us: VeryShort
        [VeryShort, Chasm, VeryShort, VeryShort, VeryShort],
    ]
};

/// Fuse two classified readings through the lookup table
pub fn fuse(us: ObstacleReading, ir: ObstacleReading) -> ObstacleReading {
    FUSION_TABLE[us.index()][ir.index()]
}

/// Fuse raw class indices; out-of-range indices clamp (ultrasonic to
/// `Surface`, infrared to `Short`) so this is total over all byte pairs.
pub fn fuse_by_index(us_index: u8, ir_index: u8) -> ObstacleReading {
    fuse(
        ObstacleReading::from_ultrasonic_index(us_index),
        ObstacleReading::from_infrared_index(ir_index),
    )
}

/// Threshold classifiers for both distance sensors.
#[derive(Debug, Clone)]
pub struct DistanceFusion {
    infrared: InfraredConfig,
    ultrasonic: UltrasonicConfig,
}

impl DistanceFusion {
    pub fn new(cfg: &SensorsConfig) -> Self {
        Self {
            infrared: cfg.infrared.clone(),
            ultrasonic: cfg.ultrasonic.clone(),
        }
    }

    /// Classify raw infrared reflectance counts.
    ///
    /// Reflectance grows as the target gets closer; anything above the last
    /// threshold is `VeryShort` by construction of the ranges.
    pub fn classify_infrared(&self, raw: u16) -> ObstacleReading {
        let t = &self.infrared;
        if raw < t.chasm_max {
            ObstacleReading::Chasm
        } else if raw < t.surface_max {
            ObstacleReading::Surface
        } else if raw < t.far_max {
            ObstacleReading::Far
        } else if raw < t.short_max {
            ObstacleReading::Short
        } else {
            ObstacleReading::VeryShort
        }
    }

    /// Classify an ultrasonic distance in millimeters.
    ///
    /// The no-echo sentinel sits beyond `far_max_mm` and therefore
    /// classifies as `Surface`.
    pub fn classify_ultrasonic(&self, mm: u16) -> ObstacleReading {
        let t = &self.ultrasonic;
        if mm < t.near_zero_max_mm {
            ObstacleReading::Chasm
        } else if mm < t.very_short_max_mm {
            ObstacleReading::VeryShort
        } else if mm < t.short_max_mm {
            ObstacleReading::Short
        } else if mm < t.far_max_mm {
            ObstacleReading::Far
        } else {
            ObstacleReading::Surface
        }
    }

    /// Run one ultrasonic measurement: trigger the echo timer, poll for
    /// completion up to the configured budget, return [`NO_ECHO`] on
    /// timeout. Holds the sensor mutex for the whole measurement.
    pub fn read_ultrasonic_raw(&self, sensors: &SharedSensors) -> Result<u16> {
        let poll_interval = Duration::from_millis(self.ultrasonic.poll_interval_ms);
        let mut guard = sensors.lock();
        guard.trigger_ultrasonic()?;
        for _ in 0..self.ultrasonic.poll_budget {
            if let Some(mm) = guard.poll_ultrasonic()? {
                return Ok(mm);
            }
            thread::sleep(poll_interval);
        }
        log::debug!("FUSION: ultrasonic echo timed out, treating as surface");
        Ok(NO_ECHO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::AnalogSensors;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn fusion() -> DistanceFusion {
        DistanceFusion::new(&crate::config::Config::tr60_defaults().sensors)
    }

    #[test]
    fn test_infrared_boundaries() {
        let f = fusion();
        assert_eq!(f.classify_infrared(0), ObstacleReading::Chasm);
        assert_eq!(f.classify_infrared(11), ObstacleReading::Chasm);
        assert_eq!(f.classify_infrared(12), ObstacleReading::Surface);
        assert_eq!(f.classify_infrared(179), ObstacleReading::Surface);
        assert_eq!(f.classify_infrared(180), ObstacleReading::Far);
        assert_eq!(f.classify_infrared(419), ObstacleReading::Far);
        assert_eq!(f.classify_infrared(420), ObstacleReading::Short);
        assert_eq!(f.classify_infrared(699), ObstacleReading::Short);
        assert_eq!(f.classify_infrared(700), ObstacleReading::VeryShort);
        assert_eq!(f.classify_infrared(u16::MAX), ObstacleReading::VeryShort);
    }

    #[test]
    fn test_ultrasonic_boundaries() {
        let f = fusion();
        assert_eq!(f.classify_ultrasonic(0), ObstacleReading::Chasm);
        assert_eq!(f.classify_ultrasonic(19), ObstacleReading::Chasm);
        assert_eq!(f.classify_ultrasonic(20), ObstacleReading::VeryShort);
        assert_eq!(f.classify_ultrasonic(149), ObstacleReading::VeryShort);
        assert_eq!(f.classify_ultrasonic(150), ObstacleReading::Short);
        assert_eq!(f.classify_ultrasonic(299), ObstacleReading::Short);
        assert_eq!(f.classify_ultrasonic(300), ObstacleReading::Far);
        assert_eq!(f.classify_ultrasonic(599), ObstacleReading::Far);
        assert_eq!(f.classify_ultrasonic(600), ObstacleReading::Surface);
        assert_eq!(f.classify_ultrasonic(NO_ECHO), ObstacleReading::Surface);
    }

    #[test]
    fn test_fuse_total_over_all_byte_pairs() {
        // Every index pair must produce a defined reading, never a panic
        for us in 0..=255u8 {
            for ir in 0..=255u8 {
                let _ = fuse_by_index(us, ir);
            }
        }
    }

    #[test]
    fn test_infrared_chasm_dominates() {
        for us in [
            ObstacleReading::Surface,
            ObstacleReading::Chasm,
            ObstacleReading::Far,
            ObstacleReading::Short,
            ObstacleReading::VeryShort,
        ] {
            assert_eq!(fuse(us, ObstacleReading::Chasm), ObstacleReading::Chasm);
        }
    }

    #[test]
    fn test_fuse_worst_case_bias() {
        assert_eq!(
            fuse(ObstacleReading::Surface, ObstacleReading::VeryShort),
            ObstacleReading::VeryShort
        );
        assert_eq!(
            fuse(ObstacleReading::VeryShort, ObstacleReading::Surface),
            ObstacleReading::VeryShort
        );
        assert_eq!(
            fuse(ObstacleReading::Far, ObstacleReading::Short),
            ObstacleReading::Short
        );
        // Near-zero echo with a quiet infrared channel degrades to Short
        assert_eq!(
            fuse(ObstacleReading::Chasm, ObstacleReading::Surface),
            ObstacleReading::Short
        );
    }

    #[test]
    fn test_no_echo_fuses_without_panic() {
        let f = fusion();
        let us = f.classify_ultrasonic(NO_ECHO);
        assert_eq!(us, ObstacleReading::Surface);
        for ir_index in 0..=255u8 {
            let _ = fuse(us, ObstacleReading::from_infrared_index(ir_index));
        }
    }

    /// Scripted sensor: echo completes after a fixed number of polls,
    /// or never when `ready_after` is `None`.
    struct ScriptedSensors {
        ready_after: Option<u32>,
        polls: u32,
        echo_mm: u16,
    }

    impl AnalogSensors for ScriptedSensors {
        fn read_infrared(&mut self) -> Result<u16> {
            Ok(0)
        }
        fn trigger_ultrasonic(&mut self) -> Result<()> {
            self.polls = 0;
            Ok(())
        }
        fn poll_ultrasonic(&mut self) -> Result<Option<u16>> {
            self.polls += 1;
            match self.ready_after {
                Some(n) if self.polls > n => Ok(Some(self.echo_mm)),
                _ => Ok(None),
            }
        }
        fn read_gyro(&mut self) -> Result<i32> {
            Ok(0)
        }
        fn read_light(&mut self) -> Result<u16> {
            Ok(0)
        }
        fn read_tilt(&mut self) -> Result<bool> {
            Ok(false)
        }
    }

    fn shared(s: ScriptedSensors) -> SharedSensors {
        Arc::new(Mutex::new(Box::new(s) as Box<dyn AnalogSensors>))
    }

    #[test]
    fn test_echo_within_budget() {
        let f = fusion();
        let sensors = shared(ScriptedSensors {
            ready_after: Some(3),
            polls: 0,
            echo_mm: 250,
        });
        assert_eq!(f.read_ultrasonic_raw(&sensors).unwrap(), 250);
    }

    #[test]
    fn test_echo_timeout_returns_sentinel() {
        let f = fusion();
        let sensors = shared(ScriptedSensors {
            ready_after: None,
            polls: 0,
            echo_mm: 0,
        });
        let raw = f.read_ultrasonic_raw(&sensors).unwrap();
        assert_eq!(raw, NO_ECHO);
        assert_eq!(f.classify_ultrasonic(raw), ObstacleReading::Surface);
    }
}
