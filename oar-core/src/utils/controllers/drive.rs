//! Obstacle-avoidance state machine.
//!
//! The [`DriveController`] is advanced once per supervisor cycle with the
//! latest [`DistanceSample`]. It decides the next [`DriveState`] and issues
//! the matching ramp and direction commands to the [`Drivetrain`].
//!
//! ```text
//!  Cruise <-> AdaptiveSlowdown
//!    |             |
//!    +---- d < threshold ----> Decelerating -> ReversingUntilSafe -> Turning -> Resuming -> Cruise
//! ```
//!
//! A missing sample never counts as "clear" or as "obstacle": while cruising it
//! is a no-op, while reversing only the elapsed time can end the phase.

use embedded_hal::digital::OutputPin;

use super::{
    drivetrain::Drivetrain,
    motor::{Actuator, Direction, RampOutcome},
    DriveError,
};
use crate::utils::{
    config::DriveConfig,
    math::speed::{adaptive_speed, speed_to_duty},
    sensors::DistanceSample,
    timing::Clock,
};

/// Fraction of the cruise duty below which a cruising wheel is ramped back up.
const CRUISE_HOLD_RATIO: f32 = 0.9;

/// Stop issuing commands once a shutdown has cancelled a ramp or pause.
macro_rules! proceed {
    ($outcome:expr) => {
        if let RampOutcome::Cancelled = $outcome {
            return Ok(RampOutcome::Cancelled);
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Cruise,
    AdaptiveSlowdown,
    Decelerating,
    ReversingUntilSafe,
    Turning,
    Resuming,
}

/// Which way the in-place turn rotates the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    /// Left wheel reverse, right wheel forward.
    Left,
    /// Left wheel forward, right wheel reverse.
    Right,
}

impl TurnDirection {
    pub fn toggled(self) -> Self {
        match self {
            TurnDirection::Left => TurnDirection::Right,
            TurnDirection::Right => TurnDirection::Left,
        }
    }

    /// Wheel directions as (left, right).
    pub fn wheels(self) -> (Direction, Direction) {
        match self {
            TurnDirection::Left => (Direction::Reverse, Direction::Forward),
            TurnDirection::Right => (Direction::Forward, Direction::Reverse),
        }
    }
}

/// Why the reverse phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseExit {
    /// A reading beyond the threshold was observed.
    Clear,
    /// The reverse ceiling elapsed first.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseReport {
    pub exit: ReverseExit,
    pub elapsed_ms: u64,
    /// Last valid reading taken while reversing.
    pub last_distance_cm: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveStats {
    pub cycles: u32,
    pub avoidances: u32,
    pub reverse_timeouts: u32,
}

/// Receives controller events; every method defaults to doing nothing.
pub trait DriveObserver {
    fn on_sample(
        &mut self,
        _state: DriveState,
        _sample: &DistanceSample,
    ) {
    }

    fn on_transition(
        &mut self,
        _from: DriveState,
        _to: DriveState,
    ) {
    }

    fn on_adaptive_speed(
        &mut self,
        _distance_cm: f32,
        _speed_pct: f32,
    ) {
    }

    fn on_reverse_finished(
        &mut self,
        _report: &ReverseReport,
    ) {
    }

    fn on_turn(
        &mut self,
        _direction: TurnDirection,
    ) {
    }
}

impl DriveObserver for () {}

/// Observer that forwards controller events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DriveObserver for TracingObserver {
    fn on_sample(
        &mut self,
        state: DriveState,
        sample: &DistanceSample,
    ) {
        match sample.value_cm {
            Some(cm) => tracing::debug!(?state, cm, at = sample.timestamp_ms, "range sample"),
            None => tracing::debug!(?state, at = sample.timestamp_ms, "no range sample"),
        }
    }

    fn on_transition(
        &mut self,
        from: DriveState,
        to: DriveState,
    ) {
        tracing::info!(?from, ?to, "drive state changed");
    }

    fn on_adaptive_speed(
        &mut self,
        distance_cm: f32,
        speed_pct: f32,
    ) {
        tracing::debug!(distance_cm, speed_pct, "adaptive slowdown");
    }

    fn on_reverse_finished(
        &mut self,
        report: &ReverseReport,
    ) {
        match report.exit {
            ReverseExit::Clear => tracing::info!(
                elapsed_ms = report.elapsed_ms,
                last = ?report.last_distance_cm,
                "safe distance reached"
            ),
            ReverseExit::Timeout => tracing::warn!(
                elapsed_ms = report.elapsed_ms,
                last = ?report.last_distance_cm,
                "reverse ceiling reached before clearing obstacle"
            ),
        }
    }

    fn on_turn(
        &mut self,
        direction: TurnDirection,
    ) {
        tracing::info!(?direction, "turning in place");
    }
}

pub struct DriveController<O = ()> {
    config: DriveConfig,
    state: DriveState,
    next_turn: TurnDirection,
    reverse_started_ms: u64,
    last_reverse_cm: Option<f32>,
    stats: DriveStats,
    observer: O,
}

impl DriveController<()> {
    pub fn new(config: DriveConfig) -> Self {
        Self::with_observer(config, ())
    }
}

impl<O: DriveObserver> DriveController<O> {
    pub fn with_observer(
        config: DriveConfig,
        observer: O,
    ) -> Self {
        DriveController {
            config,
            state: DriveState::Cruise,
            next_turn: TurnDirection::Left,
            reverse_started_ms: 0,
            last_reverse_cm: None,
            stats: DriveStats::default(),
            observer,
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn stats(&self) -> DriveStats {
        self.stats
    }

    /// Direction the next avoidance turn will take.
    pub fn next_turn(&self) -> TurnDirection {
        self.next_turn
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Whether this cycle's decision depends on a fresh range reading.
    ///
    /// Decelerating and Turning always move on, so ranging is skipped there.
    /// While reversing, a reading is only started if its worst case
    /// ([`DriveConfig::ranging_budget_ms`]) still fits before the ceiling.
    pub fn wants_sample(
        &self,
        now_ms: u64,
    ) -> bool {
        match self.state {
            DriveState::Decelerating | DriveState::Turning => false,
            DriveState::ReversingUntilSafe => {
                let elapsed = now_ms.saturating_sub(self.reverse_started_ms);
                let left = u64::from(self.config.max_reverse_ms).saturating_sub(elapsed);
                left >= self.config.ranging_budget_ms()
            }
            _ => true,
        }
    }

    fn reverse_expired(
        &self,
        now_ms: u64,
    ) -> bool {
        now_ms.saturating_sub(self.reverse_started_ms) >= u64::from(self.config.max_reverse_ms)
    }

    /// Begin a fresh run: clear the turn alternation and counters, then pull
    /// away from standstill into cruise.
    pub fn start<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        tracing::info!(cruise = self.config.cruise_speed_pct, "starting cruise");
        self.state = DriveState::Cruise;
        self.next_turn = TurnDirection::Left;
        self.reverse_started_ms = 0;
        self.last_reverse_cm = None;
        self.stats = DriveStats::default();
        self.forward(drive, self.config.cruise_speed_pct)
    }

    /// Advance the state machine by one cycle.
    pub fn tick<L, R, STBY, C>(
        &mut self,
        sample: DistanceSample,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<DriveState, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        self.stats.cycles = self.stats.cycles.wrapping_add(1);
        self.observer.on_sample(self.state, &sample);

        let next = match self.state {
            DriveState::Cruise | DriveState::AdaptiveSlowdown | DriveState::Resuming => {
                self.cruise_cycle(sample, drive)?
            }
            DriveState::Decelerating => {
                self.begin_reverse(drive)?;
                DriveState::ReversingUntilSafe
            }
            DriveState::ReversingUntilSafe => self.reverse_cycle(sample, drive)?,
            DriveState::Turning => {
                self.forward(drive, self.config.cruise_speed_pct)?;
                DriveState::Resuming
            }
        };

        if next != self.state {
            self.observer.on_transition(self.state, next);
            self.state = next;
        }
        Ok(next)
    }

    fn cruise_cycle<L, R, STBY, C>(
        &mut self,
        sample: DistanceSample,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<DriveState, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let Some(distance) = sample.value_cm else {
            // no new information: hold whatever was last commanded
            return Ok(match self.state {
                DriveState::Resuming => DriveState::Cruise,
                held => held,
            });
        };

        let threshold = self.config.threshold_cm;
        let adaptive_threshold = self.config.adaptive_threshold_cm();
        let cruise = self.config.cruise_speed_pct;

        if distance < threshold {
            self.stats.avoidances = self.stats.avoidances.wrapping_add(1);
            self.decelerate(drive)?;
            Ok(DriveState::Decelerating)
        } else if distance < adaptive_threshold {
            let speed = adaptive_speed(distance, threshold, adaptive_threshold, cruise);
            self.observer.on_adaptive_speed(distance, speed);
            if !at_duty(drive, speed_to_duty(speed)) {
                self.forward(drive, speed)?;
            }
            Ok(DriveState::AdaptiveSlowdown)
        } else {
            let floor = (f32::from(speed_to_duty(cruise)) * CRUISE_HOLD_RATIO) as u16;
            let (left, right) = drive.wheels();
            let sagging = left.current_duty < floor || right.current_duty < floor;
            if sagging || self.state == DriveState::AdaptiveSlowdown {
                self.forward(drive, cruise)?;
            }
            Ok(DriveState::Cruise)
        }
    }

    fn reverse_cycle<L, R, STBY, C>(
        &mut self,
        sample: DistanceSample,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<DriveState, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let now = drive.now_millis();
        if let Some(distance) = sample.value_cm {
            self.last_reverse_cm = Some(distance);
        }

        let exit = match sample.value_cm {
            Some(distance) if distance > self.config.threshold_cm => ReverseExit::Clear,
            _ if self.reverse_expired(now) => ReverseExit::Timeout,
            _ => return Ok(DriveState::ReversingUntilSafe),
        };

        let report = ReverseReport {
            exit,
            elapsed_ms: now.saturating_sub(self.reverse_started_ms),
            last_distance_cm: self.last_reverse_cm,
        };
        if exit == ReverseExit::Timeout {
            self.stats.reverse_timeouts = self.stats.reverse_timeouts.wrapping_add(1);
        }
        self.observer.on_reverse_finished(&report);

        self.end_reverse(drive)?;
        self.turn(drive)?;
        Ok(DriveState::Turning)
    }

    /// Bring both wheels forward to `speed_pct`, from standstill or on the move.
    fn forward<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
        speed_pct: f32,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let (left, right) = drive.wheels();
        let moving = left.current_duty > 0 || right.current_duty > 0;
        let ramp_ms = if moving {
            self.config.ramp_time_ms
        } else {
            self.config.resume_ramp_ms
        };
        drive.set_directions(Direction::Forward, Direction::Forward)?;
        drive.ramp_both(speed_pct, ramp_ms)
    }

    /// Fast ramp to standstill, coast, then a short pause.
    fn decelerate<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let outcome = drive.ramp_both(0.0, self.config.decel_ramp_ms)?;
        drive.stop_all()?;
        proceed!(outcome);
        Ok(drive.pause(self.config.decel_pause_ms))
    }

    fn begin_reverse<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        self.last_reverse_cm = None;
        self.reverse_started_ms = drive.now_millis();
        proceed!(drive.pause(self.config.settle_ms));
        drive.set_directions(Direction::Reverse, Direction::Reverse)?;
        proceed!(drive.ramp_both(self.config.reverse_speed_pct, self.config.ramp_time_ms)?);
        self.reverse_started_ms = drive.now_millis();
        Ok(RampOutcome::Completed)
    }

    fn end_reverse<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let outcome = drive.ramp_both(0.0, self.config.ramp_time_ms)?;
        drive.stop_all()?;
        Ok(outcome)
    }

    /// Rotate in place, alternating the direction on every avoidance.
    fn turn<L, R, STBY, C>(
        &mut self,
        drive: &mut Drivetrain<'_, L, R, STBY, C>,
    ) -> Result<RampOutcome, DriveError>
    where
        L: Actuator,
        R: Actuator,
        STBY: OutputPin,
        C: Clock,
    {
        let direction = self.next_turn;
        self.next_turn = direction.toggled();
        self.observer.on_turn(direction);

        proceed!(drive.pause(self.config.settle_ms));
        let (left, right) = direction.wheels();
        drive.set_directions(left, right)?;
        proceed!(drive.ramp_both(self.config.turn_speed_pct, self.config.ramp_time_ms)?);
        proceed!(drive.pause(self.config.turn_duration_ms));
        let outcome = drive.ramp_both(0.0, self.config.ramp_time_ms)?;
        drive.stop_all()?;
        Ok(outcome)
    }
}

fn at_duty<L, R, STBY, C>(
    drive: &Drivetrain<'_, L, R, STBY, C>,
    duty: u16,
) -> bool
where
    L: Actuator,
    R: Actuator,
    STBY: OutputPin,
    C: Clock,
{
    let (left, right) = drive.wheels();
    left.direction == Direction::Forward
        && right.direction == Direction::Forward
        && left.current_duty == duty
        && right.current_duty == duty
}
