//! Module Exports
//!
//! - `motor`: single-wheel H-bridge actuator with duty ramping
//! - `drivetrain`: both wheels plus the shared standby line
//! - `drive`: the obstacle-avoidance state machine
//! - `supervisor`: the polling loop that owns startup and shutdown

pub mod drive;
pub mod drivetrain;
pub mod motor;
pub mod supervisor;

use core::fmt;

use embedded_hal::{digital, pwm};

/// Hardware write/read failures surfaced by the drive stack.
///
/// Sensing timeouts are not errors; they are reported as missing samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveError {
    /// A digital line (direction, standby, trigger or echo) failed.
    Pin(digital::ErrorKind),
    /// A PWM channel rejected a duty or frequency.
    Pwm(pwm::ErrorKind),
}

impl DriveError {
    pub(crate) fn pin<E: digital::Error>(error: E) -> Self {
        DriveError::Pin(error.kind())
    }

    pub(crate) fn pwm<E: pwm::Error>(error: E) -> Self {
        DriveError::Pwm(error.kind())
    }
}

impl fmt::Display for DriveError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            DriveError::Pin(kind) => write!(f, "digital line error: {:?}", kind),
            DriveError::Pwm(kind) => write!(f, "pwm channel error: {:?}", kind),
        }
    }
}

impl core::error::Error for DriveError {}
