//! Supervisor loop.
//!
//! Ties the range sensor, the drive controller and the drivetrain together at
//! a fixed cadence. Each cycle runs sense, then decide, then actuate; the
//! inter-cycle delay is slept in short slices so a shutdown request is seen
//! quickly. However the loop ends (shutdown, run time elapsed, hardware
//! error) the wheels are stopped first and the driver is put into standby
//! second.

use embedded_hal::digital::OutputPin;

use super::{
    drive::{DriveController, DriveObserver, DriveState, DriveStats},
    drivetrain::Drivetrain,
    motor::{Actuator, RampOutcome},
    DriveError,
};
use crate::utils::{
    sensors::{DistanceSample, RangeSensor},
    timing::Clock,
};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ShutdownRequested,
    RuntimeElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub final_state: DriveState,
    pub drive: DriveStats,
    /// Readings that came back empty (no echo or implausible range).
    pub sensor_timeouts: u32,
    /// Cycles that did not need a reading.
    pub skipped_samples: u32,
}

pub struct Supervisor<'a, S, L, R, STBY, C, O = ()> {
    sensor: S,
    drive: Drivetrain<'a, L, R, STBY, C>,
    controller: DriveController<O>,
    sensor_timeouts: u32,
    skipped_samples: u32,
}

impl<'a, S, L, R, STBY, C, O> Supervisor<'a, S, L, R, STBY, C, O>
where
    S: RangeSensor,
    L: Actuator,
    R: Actuator,
    STBY: OutputPin,
    C: Clock,
    O: DriveObserver,
{
    pub fn new(
        sensor: S,
        drive: Drivetrain<'a, L, R, STBY, C>,
        controller: DriveController<O>,
    ) -> Self {
        Supervisor {
            sensor,
            drive,
            controller,
            sensor_timeouts: 0,
            skipped_samples: 0,
        }
    }

    pub fn controller(&self) -> &DriveController<O> {
        &self.controller
    }

    pub fn drivetrain(&self) -> &Drivetrain<'a, L, R, STBY, C> {
        &self.drive
    }

    /// Enable the driver, pull away into cruise and run until shutdown or the
    /// configured run time.
    pub fn run(&mut self) -> Result<RunSummary, DriveError> {
        let outcome = self.run_cycles();
        tracing::info!("stopping motors and disabling driver");
        let powered_down = self.drive.power_down();
        let reason = outcome?;
        powered_down?;
        Ok(RunSummary {
            reason,
            final_state: self.controller.state(),
            drive: self.controller.stats(),
            sensor_timeouts: self.sensor_timeouts,
            skipped_samples: self.skipped_samples,
        })
    }

    fn run_cycles(&mut self) -> Result<StopReason, DriveError> {
        self.sensor_timeouts = 0;
        self.skipped_samples = 0;
        if self.drive.shutdown_requested() {
            return Ok(StopReason::ShutdownRequested);
        }
        self.drive.enable()?;
        let started = self.drive.now_millis();
        self.controller.start(&mut self.drive)?;

        let loop_delay = self.controller.config().loop_delay_ms;
        let max_runtime = self.controller.config().max_runtime_ms;
        loop {
            if self.drive.shutdown_requested() {
                return Ok(StopReason::ShutdownRequested);
            }
            if let Some(limit) = max_runtime {
                if self.drive.now_millis().saturating_sub(started) >= limit {
                    tracing::info!(limit, "run time elapsed");
                    return Ok(StopReason::RuntimeElapsed);
                }
            }
            self.cycle()?;
            if let RampOutcome::Cancelled = self.drive.pause(loop_delay) {
                return Ok(StopReason::ShutdownRequested);
            }
        }
    }

    /// One sense, decide, actuate pass.
    pub fn cycle(&mut self) -> Result<DriveState, DriveError> {
        let now = self.drive.now_millis();
        let sample = if self.controller.wants_sample(now) {
            let value = self.sensor.measure()?;
            if value.is_none() {
                self.sensor_timeouts = self.sensor_timeouts.wrapping_add(1);
            }
            DistanceSample::new(value, self.drive.now_millis())
        } else {
            self.skipped_samples = self.skipped_samples.wrapping_add(1);
            DistanceSample::missing(now)
        };
        self.controller.tick(sample, &mut self.drive)
    }

    /// Take the parts back, e.g. to inspect them after a run.
    pub fn into_parts(self) -> (S, Drivetrain<'a, L, R, STBY, C>, DriveController<O>) {
        (self.sensor, self.drive, self.controller)
    }
}
