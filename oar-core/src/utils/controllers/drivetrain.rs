//! Two-wheel drivetrain on a shared H-bridge.
//!
//! Owns both [`Actuator`]s, the driver standby line and the clock used for
//! ramp steps and pauses. Coordinated manoeuvres step both wheels back to
//! back before each sleep, so the wheels never drift apart mid-ramp.

use embedded_hal::digital::OutputPin;

use super::{
    motor::{Actuator, ActuatorState, Direction, RampOutcome, RampPlan, RAMP_STEP_MS},
    DriveError,
};
use crate::utils::{math::speed::speed_to_duty, timing::{Clock, Shutdown}};

pub struct Drivetrain<'a, L, R, STBY, C> {
    pub left: L,
    pub right: R,
    standby: STBY,
    clock: C,
    shutdown: &'a Shutdown,
    enabled: bool,
}

impl<'a, L, R, STBY, C> Drivetrain<'a, L, R, STBY, C>
where
    L: Actuator,
    R: Actuator,
    STBY: OutputPin,
    C: Clock,
{
    /// Assemble a drivetrain. The standby line is left untouched until [`enable`](Self::enable).
    pub fn new(
        left: L,
        right: R,
        standby: STBY,
        clock: C,
        shutdown: &'a Shutdown,
    ) -> Self {
        Drivetrain {
            left,
            right,
            standby,
            clock,
            shutdown,
            enabled: false,
        }
    }

    /// Take the driver out of standby.
    pub fn enable(&mut self) -> Result<(), DriveError> {
        self.standby.set_high().map_err(DriveError::pin)?;
        self.set_enabled(true);
        tracing::info!("motor driver enabled");
        Ok(())
    }

    /// Put the driver into standby.
    pub fn disable(&mut self) -> Result<(), DriveError> {
        self.standby.set_low().map_err(DriveError::pin)?;
        self.set_enabled(false);
        tracing::info!("motor driver disabled");
        Ok(())
    }

    fn set_enabled(
        &mut self,
        enabled: bool,
    ) {
        self.enabled = enabled;
        self.left.set_enabled(enabled);
        self.right.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn wheels(&self) -> (ActuatorState, ActuatorState) {
        (self.left.state(), self.right.state())
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Sleep for `ms` in ramp-step slices, returning early on shutdown.
    pub fn pause(
        &mut self,
        ms: u32,
    ) -> RampOutcome {
        let mut remaining = ms;
        while remaining > 0 {
            if self.shutdown.is_requested() {
                return RampOutcome::Cancelled;
            }
            let slice = remaining.min(RAMP_STEP_MS);
            self.clock.delay_ms(slice);
            remaining -= slice;
        }
        if self.shutdown.is_requested() {
            RampOutcome::Cancelled
        } else {
            RampOutcome::Completed
        }
    }

    /// Put both wheels into the given directions.
    ///
    /// A wheel already turning the requested way keeps its duty; a wheel that
    /// changes direction does so at zero duty.
    pub fn set_directions(
        &mut self,
        left: Direction,
        right: Direction,
    ) -> Result<(), DriveError> {
        align(&mut self.left, left)?;
        align(&mut self.right, right)
    }

    /// Ramp both wheels in lockstep to their own targets over `ramp_ms`.
    pub fn ramp_pair(
        &mut self,
        left_pct: f32,
        right_pct: f32,
        ramp_ms: u32,
    ) -> Result<RampOutcome, DriveError> {
        let left_plan = RampPlan::new(self.left.state().current_duty, speed_to_duty(left_pct), ramp_ms);
        let right_plan = RampPlan::new(
            self.right.state().current_duty,
            speed_to_duty(right_pct),
            ramp_ms,
        );
        tracing::trace!(
            left = left_plan.target(),
            right = right_plan.target(),
            steps = left_plan.steps(),
            "ramping wheels"
        );
        for step in 1..=left_plan.steps() {
            if self.shutdown.is_requested() {
                return Ok(RampOutcome::Cancelled);
            }
            self.left.write_duty(left_plan.duty_at(step))?;
            self.right.write_duty(right_plan.duty_at(step))?;
            self.clock.delay_ms(left_plan.step_ms());
        }
        Ok(RampOutcome::Completed)
    }

    /// Ramp both wheels to the same speed.
    pub fn ramp_both(
        &mut self,
        speed_pct: f32,
        ramp_ms: u32,
    ) -> Result<RampOutcome, DriveError> {
        self.ramp_pair(speed_pct, speed_pct, ramp_ms)
    }

    pub fn stop_all(&mut self) -> Result<(), DriveError> {
        self.left.stop()?;
        self.right.stop()
    }

    /// Orderly shutdown: coast both wheels, then put the driver into standby.
    ///
    /// The standby line is released even if stopping a wheel failed; the
    /// first error is reported.
    pub fn power_down(&mut self) -> Result<(), DriveError> {
        let stopped = self.stop_all();
        let disabled = self.disable();
        stopped.and(disabled)
    }

    /// Release the wheels, the standby line and the clock.
    pub fn release(self) -> (L, R, STBY, C) {
        (self.left, self.right, self.standby, self.clock)
    }
}

fn align<A: Actuator>(
    wheel: &mut A,
    direction: Direction,
) -> Result<(), DriveError> {
    if wheel.state().direction == direction {
        return Ok(());
    }
    match direction {
        Direction::Forward => wheel.set_forward(0.0),
        Direction::Reverse => wheel.set_reverse(0.0),
        Direction::Idle => wheel.stop(),
        Direction::Brake => wheel.brake(),
    }
}
