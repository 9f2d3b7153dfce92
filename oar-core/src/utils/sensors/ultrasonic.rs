//! Ultrasonic ranging over a trigger/echo pin pair.
//!
//! The sensor is triggered with a 10 us high pulse; it answers by holding the
//! echo line high for the round-trip time of the sound burst. Both echo edges
//! are awaited with [`poll_until`], so a silent sensor costs at most two
//! timeouts and never hangs the caller.

use embedded_hal::digital::{InputPin, OutputPin};

use super::RangeSensor;
use crate::utils::{
    config::DriveConfig,
    controllers::DriveError,
    math::speed::echo_to_cm,
    timing::{poll_until, Clock},
};

/// Width of the trigger pulse.
pub const TRIGGER_PULSE_US: u32 = 10;
/// Readings beyond this are treated as noise.
pub const MAX_RANGE_CM: f32 = 300.0;

const DEFAULT_TIMEOUT_US: u32 = 30_000;
const DEFAULT_SETTLE_US: u32 = 200;

pub struct Ultrasonic<TRIG, ECHO, C> {
    trigger: TRIG,
    echo: ECHO,
    clock: C,
    timeout_us: u32,
    settle_us: u32,
}

impl<TRIG, ECHO, C> Ultrasonic<TRIG, ECHO, C>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    C: Clock,
{
    /// Bind the sensor and park the trigger line low.
    pub fn new(
        mut trigger: TRIG,
        echo: ECHO,
        clock: C,
    ) -> Result<Self, DriveError> {
        trigger.set_low().map_err(DriveError::pin)?;
        Ok(Ultrasonic {
            trigger,
            echo,
            clock,
            timeout_us: DEFAULT_TIMEOUT_US,
            settle_us: DEFAULT_SETTLE_US,
        })
    }

    /// Bind the sensor using the echo timeout and trigger settle time of `config`.
    pub fn from_config(
        trigger: TRIG,
        echo: ECHO,
        clock: C,
        config: &DriveConfig,
    ) -> Result<Self, DriveError> {
        Ok(Self::new(trigger, echo, clock)?
            .with_timeout_us(config.echo_timeout_us)
            .with_settle_us(config.trigger_settle_us))
    }

    pub fn with_timeout_us(
        mut self,
        timeout_us: u32,
    ) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    pub fn with_settle_us(
        mut self,
        settle_us: u32,
    ) -> Self {
        self.settle_us = settle_us;
        self
    }

    pub fn timeout_us(&self) -> u32 {
        self.timeout_us
    }

    /// Fire one trigger pulse and time the echo.
    ///
    /// Returns `Ok(None)` if either echo edge misses the timeout or the
    /// distance exceeds [`MAX_RANGE_CM`].
    pub fn measure(&mut self) -> Result<Option<f32>, DriveError> {
        self.trigger.set_low().map_err(DriveError::pin)?;
        self.clock.delay_us(self.settle_us);
        self.trigger.set_high().map_err(DriveError::pin)?;
        self.clock.delay_us(TRIGGER_PULSE_US);
        self.trigger.set_low().map_err(DriveError::pin)?;

        let timeout = u64::from(self.timeout_us);
        let echo = &mut self.echo;

        if !poll_until(&self.clock, timeout, || echo.is_high().map_err(DriveError::pin))? {
            tracing::debug!("no echo rise within {} us", timeout);
            return Ok(None);
        }
        let rise = self.clock.now_micros();

        if !poll_until(&self.clock, timeout, || echo.is_low().map_err(DriveError::pin))? {
            tracing::debug!("echo held high past {} us", timeout);
            return Ok(None);
        }
        let fall = self.clock.now_micros();

        let distance = echo_to_cm(fall.saturating_sub(rise));
        if distance > MAX_RANGE_CM {
            tracing::debug!(distance, "implausible range discarded");
            return Ok(None);
        }
        Ok(Some(distance))
    }

    /// Release the trigger and echo lines and the clock.
    pub fn release(self) -> (TRIG, ECHO, C) {
        (self.trigger, self.echo, self.clock)
    }
}

impl<TRIG, ECHO, C> RangeSensor for Ultrasonic<TRIG, ECHO, C>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    C: Clock,
{
    fn measure(&mut self) -> Result<Option<f32>, DriveError> {
        Ultrasonic::measure(self)
    }
}
