//! H-bridge motor actuator.
//!
//! One [`Motor`] drives one wheel through a TB6612FNG-style channel: two
//! direction lines (`IN1`/`IN2`) and a PWM speed input. The motor owns its
//! [`ActuatorState`]; the rest of the stack changes it only through the
//! [`Actuator`] operations.
//!
//! | IN1 | IN2 | effect  |
//! |-----|-----|---------|
//! | H   | L   | forward |
//! | L   | H   | reverse |
//! | L   | L   | coast   |
//! | H   | H   | brake   |

use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
    pwm::SetDutyCycle,
};

use super::DriveError;
use crate::utils::{
    math::speed::{speed_to_duty, MAX_DUTY},
    timing::Shutdown,
};

/// Nominal duration of one ramp step.
pub const RAMP_STEP_MS: u32 = 20;

/// PWM channel whose carrier frequency can be chosen at runtime.
pub trait PwmOutput: SetDutyCycle {
    fn set_frequency(
        &mut self,
        hz: u32,
    ) -> Result<(), Self::Error>;
}

/// Commanded direction of a wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    Reverse,
    /// Both lines low, the wheel coasts.
    #[default]
    Idle,
    /// Both lines high, the wheel is shorted for holding torque.
    Brake,
}

impl Direction {
    /// Levels of (`IN1`, `IN2`) for this direction.
    pub fn lines(self) -> (bool, bool) {
        match self {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
            Direction::Idle => (false, false),
            Direction::Brake => (true, true),
        }
    }
}

/// Snapshot of what a motor was last commanded to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorState {
    pub current_duty: u16,
    pub direction: Direction,
    /// Mirrors the shared driver standby line.
    pub is_enabled: bool,
}

/// Result of a blocking ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampOutcome {
    Completed,
    /// Shutdown was requested between steps; the duty was left mid-ramp.
    Cancelled,
}

/// Stepped duty schedule from a start duty to a target duty.
///
/// Uses `max(1, ramp_ms / 20)` steps of `ramp_ms / steps` milliseconds. Each
/// step moves by `(target - start) / steps` (truncating), and the final step
/// lands exactly on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampPlan {
    start: u16,
    target: u16,
    steps: u32,
    step_ms: u32,
    delta: i64,
}

impl RampPlan {
    pub fn new(
        start: u16,
        target: u16,
        ramp_ms: u32,
    ) -> Self {
        let steps = (ramp_ms / RAMP_STEP_MS).max(1);
        let step_ms = ramp_ms / steps;
        let delta = (i64::from(target) - i64::from(start)) / i64::from(steps);
        Self {
            start,
            target,
            steps,
            step_ms,
            delta,
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn step_ms(&self) -> u32 {
        self.step_ms
    }

    pub fn target(&self) -> u16 {
        self.target
    }

    /// Duty after the 1-based `step`.
    pub fn duty_at(
        &self,
        step: u32,
    ) -> u16 {
        if step >= self.steps {
            self.target
        } else {
            (i64::from(self.start) + self.delta * i64::from(step)) as u16
        }
    }
}

/// Operations a drive wheel supports.
pub trait Actuator {
    fn state(&self) -> ActuatorState;

    /// Set forward direction and duty together.
    fn set_forward(
        &mut self,
        speed_pct: f32,
    ) -> Result<(), DriveError>;

    /// Set reverse direction and duty together.
    fn set_reverse(
        &mut self,
        speed_pct: f32,
    ) -> Result<(), DriveError>;

    /// Change duty, keeping the current direction.
    fn set_speed(
        &mut self,
        speed_pct: f32,
    ) -> Result<(), DriveError> {
        self.write_duty(speed_to_duty(speed_pct))
    }

    /// Duty to zero and both lines low (coast).
    fn stop(&mut self) -> Result<(), DriveError>;

    /// Both lines high and duty to zero (short brake).
    fn brake(&mut self) -> Result<(), DriveError>;

    /// Write a raw duty without touching the direction lines.
    fn write_duty(
        &mut self,
        duty: u16,
    ) -> Result<(), DriveError>;

    /// Record whether the shared standby line currently enables the driver.
    fn set_enabled(
        &mut self,
        enabled: bool,
    );

    /// Step the duty toward `target_pct` over `ramp_ms`, blocking throughout.
    ///
    /// The ramp is relative to the current duty and keeps the current
    /// direction. `shutdown` is checked before every step.
    fn ramp_to<D: DelayNs>(
        &mut self,
        target_pct: f32,
        ramp_ms: u32,
        delay: &mut D,
        shutdown: &Shutdown,
    ) -> Result<RampOutcome, DriveError> {
        let plan = RampPlan::new(self.state().current_duty, speed_to_duty(target_pct), ramp_ms);
        for step in 1..=plan.steps() {
            if shutdown.is_requested() {
                return Ok(RampOutcome::Cancelled);
            }
            self.write_duty(plan.duty_at(step))?;
            delay.delay_ms(plan.step_ms());
        }
        Ok(RampOutcome::Completed)
    }

    /// Ramp to zero, then coast.
    fn ramp_stop<D: DelayNs>(
        &mut self,
        ramp_ms: u32,
        delay: &mut D,
        shutdown: &Shutdown,
    ) -> Result<RampOutcome, DriveError> {
        let outcome = self.ramp_to(0.0, ramp_ms, delay, shutdown)?;
        self.stop()?;
        Ok(outcome)
    }
}

/// One wheel on an H-bridge channel.
pub struct Motor<IN1, IN2, PWM> {
    in1: IN1,
    in2: IN2,
    pwm: PWM,
    state: ActuatorState,
}

impl<IN1, IN2, PWM> Motor<IN1, IN2, PWM>
where
    IN1: OutputPin,
    IN2: OutputPin,
    PWM: PwmOutput,
{
    /// Bind a motor to its lines, set the carrier frequency and leave it coasting at zero duty.
    pub fn new(
        in1: IN1,
        in2: IN2,
        pwm: PWM,
        frequency_hz: u32,
    ) -> Result<Self, DriveError> {
        let mut motor = Motor {
            in1,
            in2,
            pwm,
            state: ActuatorState::default(),
        };
        motor
            .pwm
            .set_frequency(frequency_hz)
            .map_err(DriveError::pwm)?;
        motor.write_duty(0)?;
        motor.write_lines(Direction::Idle)?;
        Ok(motor)
    }

    /// Release the underlying lines.
    pub fn release(self) -> (IN1, IN2, PWM) {
        (self.in1, self.in2, self.pwm)
    }

    fn write_lines(
        &mut self,
        direction: Direction,
    ) -> Result<(), DriveError> {
        let (a, b) = direction.lines();
        self.in1
            .set_state(PinState::from(a))
            .map_err(DriveError::pin)?;
        self.in2
            .set_state(PinState::from(b))
            .map_err(DriveError::pin)?;
        self.state.direction = direction;
        Ok(())
    }

    /// Direction first, then duty. Switching direction under load drops the
    /// duty to zero before the lines change.
    fn drive(
        &mut self,
        direction: Direction,
        speed_pct: f32,
    ) -> Result<(), DriveError> {
        if self.state.direction != direction && self.state.current_duty > 0 {
            self.write_duty(0)?;
        }
        self.write_lines(direction)?;
        self.write_duty(speed_to_duty(speed_pct))
    }
}

impl<IN1, IN2, PWM> Actuator for Motor<IN1, IN2, PWM>
where
    IN1: OutputPin,
    IN2: OutputPin,
    PWM: PwmOutput,
{
    fn state(&self) -> ActuatorState {
        self.state
    }

    fn set_forward(
        &mut self,
        speed_pct: f32,
    ) -> Result<(), DriveError> {
        tracing::trace!(speed_pct, "motor forward");
        self.drive(Direction::Forward, speed_pct)
    }

    fn set_reverse(
        &mut self,
        speed_pct: f32,
    ) -> Result<(), DriveError> {
        tracing::trace!(speed_pct, "motor reverse");
        self.drive(Direction::Reverse, speed_pct)
    }

    fn stop(&mut self) -> Result<(), DriveError> {
        tracing::trace!("motor stop");
        self.write_duty(0)?;
        self.write_lines(Direction::Idle)
    }

    fn brake(&mut self) -> Result<(), DriveError> {
        tracing::trace!("motor brake");
        self.write_lines(Direction::Brake)?;
        self.write_duty(0)
    }

    fn write_duty(
        &mut self,
        duty: u16,
    ) -> Result<(), DriveError> {
        self.pwm
            .set_duty_cycle_fraction(duty, MAX_DUTY)
            .map_err(DriveError::pwm)?;
        self.state.current_duty = duty;
        Ok(())
    }

    fn set_enabled(
        &mut self,
        enabled: bool,
    ) {
        self.state.is_enabled = enabled;
    }
}
