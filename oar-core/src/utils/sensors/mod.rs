//! Range sensing.
//!
//! - `ultrasonic`: HC-SR04/HC-SR05 trigger/echo ranging

pub mod ultrasonic;

use crate::utils::controllers::DriveError;

/// One range reading as seen by the drive controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSample {
    /// `None` when no plausible echo arrived in time.
    pub value_cm: Option<f32>,
    pub timestamp_ms: u64,
}

impl DistanceSample {
    pub fn new(
        value_cm: Option<f32>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            value_cm,
            timestamp_ms,
        }
    }

    /// A cycle that carries no distance information.
    pub fn missing(timestamp_ms: u64) -> Self {
        Self::new(None, timestamp_ms)
    }
}

/// Anything that can produce a single bounded-time distance estimate.
pub trait RangeSensor {
    /// Returns `Ok(None)` for a sensing failure (no echo, implausible range).
    fn measure(&mut self) -> Result<Option<f32>, DriveError>;
}
