//! Simulated vehicle for the host build.
//!
//! A [`World`] holds virtual time, every line and duty the controller writes,
//! and one obstacle straight ahead. Time moves only when the controller reads
//! the clock or sleeps, and every advance integrates the wheel motion: the
//! obstacle closes in while cruising and falls back while reversing. After
//! roughly 60 degrees of in-place rotation the vehicle faces a fresh obstacle
//! at a random distance.

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use embassy_time::Duration;
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType as DigitalErrorType, InputPin, OutputPin},
    pwm::{ErrorType as PwmErrorType, SetDutyCycle},
};
use nanorand::{Rng, WyRand};
use oar_core::utils::{math::speed::SPEED_OF_SOUND_CM_PER_US, Clock, PwmOutput};

/// Wheel surface speed at full duty (cm/s).
const TOP_SPEED_CM_S: f64 = 60.0;
/// Distance between the wheel contact points (cm).
const TRACK_WIDTH_CM: f64 = 14.0;
/// Rotation after which the vehicle faces a new obstacle.
const RETARGET_DEG: f64 = 60.0;
/// Closest the bumper gets to an obstacle.
const CONTACT_CM: f64 = 3.0;
/// Obstacles beyond this return no echo.
const SENSOR_MAX_CM: f64 = 400.0;
/// Delay between the trigger falling edge and the echo rising edge.
const ECHO_LATENCY_US: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Standby,
    In1(Side),
    In2(Side),
    Trigger,
}

pub type SharedWorld = Rc<RefCell<World>>;

pub struct World {
    now_us: u64,
    obstacle_cm: f64,
    turned_deg: f64,
    standby: bool,
    /// (`IN1`, `IN2`) per wheel.
    lines: [(bool, bool); 2],
    duty: [u16; 2],
    trigger_high: bool,
    echo: Option<(u64, u64)>,
    rng: WyRand,
    dropout_pct: u32,
    realtime: bool,
    touching: bool,
    contacts: u32,
}

impl World {
    pub fn new(
        seed: u64,
        dropout_pct: u32,
        realtime: bool,
    ) -> Self {
        let mut rng = WyRand::new_seed(seed);
        let obstacle_cm = f64::from(rng.generate_range(60_u32..=250));
        tracing::info!(obstacle_cm, "simulated obstacle placed");
        World {
            now_us: 0,
            obstacle_cm,
            turned_deg: 0.0,
            standby: false,
            lines: [(false, false); 2],
            duty: [0; 2],
            trigger_high: false,
            echo: None,
            rng,
            dropout_pct: dropout_pct.min(100),
            realtime,
            touching: false,
            contacts: 0,
        }
    }

    pub fn shared(self) -> SharedWorld {
        Rc::new(RefCell::new(self))
    }

    pub fn now_millis(&self) -> u64 {
        self.now_us / 1_000
    }

    /// Times the vehicle ran into an obstacle.
    pub fn contacts(&self) -> u32 {
        self.contacts
    }

    pub fn obstacle_cm(&self) -> f64 {
        self.obstacle_cm
    }

    fn wheel_speed(
        &self,
        side: Side,
    ) -> f64 {
        if !self.standby {
            return 0.0;
        }
        let i = side.index();
        let magnitude = f64::from(self.duty[i]) / f64::from(u16::MAX) * TOP_SPEED_CM_S;
        match self.lines[i] {
            (true, false) => magnitude,
            (false, true) => -magnitude,
            _ => 0.0,
        }
    }

    fn advance(
        &mut self,
        us: u64,
    ) {
        if us == 0 {
            return;
        }
        let dt = us as f64 / 1e6;
        let left = self.wheel_speed(Side::Left);
        let right = self.wheel_speed(Side::Right);
        self.now_us += us;

        let forward = (left + right) / 2.0;
        self.obstacle_cm -= forward * dt;
        if self.obstacle_cm <= CONTACT_CM {
            self.obstacle_cm = CONTACT_CM;
            if !self.touching {
                self.touching = true;
                self.contacts += 1;
                tracing::warn!(at_ms = self.now_millis(), "bumper contact");
            }
        } else {
            self.touching = false;
        }

        self.turned_deg += ((right - left) / TRACK_WIDTH_CM * dt).to_degrees().abs();
        if self.turned_deg >= RETARGET_DEG {
            self.turned_deg = 0.0;
            self.obstacle_cm = f64::from(self.rng.generate_range(15_u32..=250));
            tracing::debug!(obstacle_cm = self.obstacle_cm, "facing new obstacle");
        }
    }

    fn sleep(
        &mut self,
        us: u64,
    ) {
        self.advance(us);
        if self.realtime {
            embassy_time::block_for(Duration::from_micros(us));
        }
    }

    fn write_line(
        &mut self,
        line: Line,
        high: bool,
    ) {
        match line {
            Line::Standby => self.standby = high,
            Line::In1(side) => self.lines[side.index()].0 = high,
            Line::In2(side) => self.lines[side.index()].1 = high,
            Line::Trigger => {
                if self.trigger_high && !high {
                    self.fire();
                }
                self.trigger_high = high;
            }
        }
    }

    /// Schedule the echo for a trigger pulse that just ended.
    fn fire(&mut self) {
        let lost = self.rng.generate_range(0_u32..100) < self.dropout_pct;
        self.echo = if lost || self.obstacle_cm > SENSOR_MAX_CM {
            None
        } else {
            let round_trip = (2.0 * self.obstacle_cm / f64::from(SPEED_OF_SOUND_CM_PER_US)) as u64;
            let rise = self.now_us + ECHO_LATENCY_US;
            Some((rise, rise + round_trip))
        };
    }

    fn echo_high(&self) -> bool {
        self.echo
            .is_some_and(|(rise, fall)| self.now_us >= rise && self.now_us < fall)
    }
}

/// Output line into the simulated world.
pub struct SimPin {
    world: SharedWorld,
    line: Line,
}

impl SimPin {
    pub fn new(
        world: &SharedWorld,
        line: Line,
    ) -> Self {
        SimPin {
            world: world.clone(),
            line,
        }
    }
}

impl DigitalErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.world.borrow_mut().write_line(self.line, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.world.borrow_mut().write_line(self.line, true);
        Ok(())
    }
}

/// Echo input of the simulated range sensor.
pub struct SimEcho {
    world: SharedWorld,
}

impl SimEcho {
    pub fn new(world: &SharedWorld) -> Self {
        SimEcho {
            world: world.clone(),
        }
    }
}

impl DigitalErrorType for SimEcho {
    type Error = Infallible;
}

impl InputPin for SimEcho {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.world.borrow().echo_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.world.borrow().echo_high())
    }
}

pub struct SimPwm {
    world: SharedWorld,
    side: Side,
}

impl SimPwm {
    pub fn new(
        world: &SharedWorld,
        side: Side,
    ) -> Self {
        SimPwm {
            world: world.clone(),
            side,
        }
    }
}

impl PwmErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        self.world.borrow_mut().duty[self.side.index()] = duty;
        Ok(())
    }
}

impl PwmOutput for SimPwm {
    fn set_frequency(
        &mut self,
        hz: u32,
    ) -> Result<(), Self::Error> {
        tracing::debug!(side = ?self.side, hz, "pwm carrier set");
        Ok(())
    }
}

/// Virtual clock. Each read advances one microsecond; with `realtime` set,
/// sleeps are also paced against the wall clock.
pub struct SimClock {
    world: SharedWorld,
}

impl SimClock {
    pub fn new(world: &SharedWorld) -> Self {
        SimClock {
            world: world.clone(),
        }
    }
}

impl DelayNs for SimClock {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        self.world.borrow_mut().sleep(u64::from(ns).div_ceil(1_000));
    }

    fn delay_us(
        &mut self,
        us: u32,
    ) {
        self.world.borrow_mut().sleep(u64::from(us));
    }

    fn delay_ms(
        &mut self,
        ms: u32,
    ) {
        self.world.borrow_mut().sleep(u64::from(ms) * 1_000);
    }
}

impl Clock for SimClock {
    fn now_micros(&self) -> u64 {
        let mut world = self.world.borrow_mut();
        world.advance(1);
        world.now_us
    }
}
