//! Utility re-exports for the obstacle-avoiding robot.
//!
//! This module re-exports the drive stack and its supporting pieces:
//!
//! - `config`: tunables read once at startup
//! - `controllers`: motor actuators, the drivetrain, the drive state machine and the supervisor loop
//! - `math`: duty, echo and adaptive-speed conversions
//! - `sensors`: ultrasonic ranging
//! - `timing`: clock abstraction, bounded polling and cooperative shutdown

pub mod config;
pub mod controllers;
pub mod math;
pub mod sensors;
pub mod timing;

pub use config::{ConfigError, DriveConfig};
pub use controllers::{
    drive::{DriveController, DriveObserver, DriveState, TracingObserver, TurnDirection},
    drivetrain::Drivetrain,
    motor::{Actuator, Direction, Motor, PwmOutput},
    supervisor::{RunSummary, StopReason, Supervisor},
    DriveError,
};
pub use sensors::{ultrasonic::Ultrasonic, DistanceSample, RangeSensor};
pub use timing::{Clock, EmbassyClock, Shutdown};
