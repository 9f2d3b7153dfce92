//! Shared fakes for the integration tests: a virtual clock, pins and PWM
//! channels that record every write into one ordered log, a scripted range
//! sensor and an observer that remembers controller events.
#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType as DigitalErrorType, InputPin, OutputPin},
    pwm::{ErrorType as PwmErrorType, SetDutyCycle},
};
use oar_core::utils::{
    config::DriveConfig,
    controllers::{
        drive::{DriveObserver, DriveState, ReverseReport, TurnDirection},
        drivetrain::Drivetrain,
        motor::{Motor, PwmOutput},
        DriveError,
    },
    sensors::{DistanceSample, RangeSensor},
    timing::{Clock, Shutdown},
};

/// Lines that can show up in the write log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Standby,
    LeftIn1,
    LeftIn2,
    RightIn1,
    RightIn2,
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Pin(Line, bool),
    Duty(Side, u16),
    Frequency(Side, u32),
}

pub type Log = Rc<RefCell<Vec<Event>>>;

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Virtual time in microseconds. Delays advance it exactly; every read
/// advances it by one microsecond so busy-wait loops make progress.
#[derive(Clone, Default)]
pub struct VirtualClock {
    now: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek_micros(&self) -> u64 {
        self.now.get()
    }

    pub fn peek_millis(&self) -> u64 {
        self.now.get() / 1_000
    }

    pub fn advance_us(
        &self,
        us: u64,
    ) {
        self.now.set(self.now.get() + us);
    }
}

impl DelayNs for VirtualClock {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        self.advance_us(u64::from(ns).div_ceil(1_000));
    }

    fn delay_us(
        &mut self,
        us: u32,
    ) {
        self.advance_us(u64::from(us));
    }

    fn delay_ms(
        &mut self,
        ms: u32,
    ) {
        self.advance_us(u64::from(ms) * 1_000);
    }
}

impl Clock for VirtualClock {
    fn now_micros(&self) -> u64 {
        self.advance_us(1);
        self.now.get()
    }
}

pub struct RecordingPin {
    line: Line,
    log: Log,
}

impl RecordingPin {
    pub fn new(
        line: Line,
        log: &Log,
    ) -> Self {
        Self {
            line,
            log: log.clone(),
        }
    }
}

impl DigitalErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Pin(self.line, false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Pin(self.line, true));
        Ok(())
    }
}

/// PWM channel that logs duties and can raise a shutdown after a number of
/// duty writes, simulating an operator interrupt in the middle of a ramp.
pub struct RecordingPwm<'a> {
    side: Side,
    log: Log,
    writes: usize,
    trip: Option<(usize, &'a Shutdown)>,
}

impl<'a> RecordingPwm<'a> {
    pub fn new(
        side: Side,
        log: &Log,
    ) -> Self {
        Self {
            side,
            log: log.clone(),
            writes: 0,
            trip: None,
        }
    }

    pub fn tripping(
        mut self,
        after_writes: usize,
        shutdown: &'a Shutdown,
    ) -> Self {
        self.trip = Some((after_writes, shutdown));
        self
    }
}

impl PwmErrorType for RecordingPwm<'_> {
    type Error = Infallible;
}

impl SetDutyCycle for RecordingPwm<'_> {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Duty(self.side, duty));
        self.writes += 1;
        if let Some((after, shutdown)) = self.trip {
            if self.writes == after {
                shutdown.request();
            }
        }
        Ok(())
    }
}

impl PwmOutput for RecordingPwm<'_> {
    fn set_frequency(
        &mut self,
        hz: u32,
    ) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Frequency(self.side, hz));
        Ok(())
    }
}

pub type TestMotor<'a> = Motor<RecordingPin, RecordingPin, RecordingPwm<'a>>;
pub type TestDrivetrain<'a> = Drivetrain<'a, TestMotor<'a>, TestMotor<'a>, RecordingPin, VirtualClock>;

pub fn left_motor<'a>(log: &Log) -> TestMotor<'a> {
    Motor::new(
        RecordingPin::new(Line::LeftIn1, log),
        RecordingPin::new(Line::LeftIn2, log),
        RecordingPwm::new(Side::Left, log),
        10_000,
    )
    .unwrap()
}

pub fn right_motor<'a>(log: &Log) -> TestMotor<'a> {
    Motor::new(
        RecordingPin::new(Line::RightIn1, log),
        RecordingPin::new(Line::RightIn2, log),
        RecordingPwm::new(Side::Right, log),
        10_000,
    )
    .unwrap()
}

/// Drivetrain on recording hardware with its standby line logged.
pub fn drivetrain<'a>(
    log: &Log,
    clock: &VirtualClock,
    shutdown: &'a Shutdown,
) -> TestDrivetrain<'a> {
    Drivetrain::new(
        left_motor(log),
        right_motor(log),
        RecordingPin::new(Line::Standby, log),
        clock.clone(),
        shutdown,
    )
}

/// Configuration used by the scenario tests: 30 cm trigger, 45 cm adaptive band.
pub fn scenario_config() -> DriveConfig {
    DriveConfig {
        threshold_cm: 30.0,
        adaptive_threshold_mult: 1.5,
        ..DriveConfig::default()
    }
}

/// Range sensor that replays a script, then repeats `fallback`.
pub struct ScriptedSensor {
    script: VecDeque<Option<f32>>,
    fallback: Option<f32>,
    clock: VirtualClock,
    cost_us: u64,
    pub reads: usize,
}

impl ScriptedSensor {
    pub fn new(
        script: &[Option<f32>],
        fallback: Option<f32>,
        clock: &VirtualClock,
    ) -> Self {
        Self {
            script: script.iter().copied().collect(),
            fallback,
            clock: clock.clone(),
            cost_us: 0,
            reads: 0,
        }
    }

    /// Charge every reading this much virtual time.
    pub fn costing_us(
        mut self,
        cost_us: u64,
    ) -> Self {
        self.cost_us = cost_us;
        self
    }
}

impl RangeSensor for ScriptedSensor {
    fn measure(&mut self) -> Result<Option<f32>, DriveError> {
        self.reads += 1;
        self.clock.advance_us(self.cost_us);
        Ok(self.script.pop_front().unwrap_or(self.fallback))
    }
}

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    pub samples: Vec<(DriveState, DistanceSample)>,
    pub transitions: Vec<(DriveState, DriveState)>,
    pub adaptive: Vec<(f32, f32)>,
    pub reverses: Vec<ReverseReport>,
    pub turns: Vec<TurnDirection>,
}

impl DriveObserver for RecordingObserver {
    fn on_sample(
        &mut self,
        state: DriveState,
        sample: &DistanceSample,
    ) {
        self.samples.push((state, *sample));
    }

    fn on_transition(
        &mut self,
        from: DriveState,
        to: DriveState,
    ) {
        self.transitions.push((from, to));
    }

    fn on_adaptive_speed(
        &mut self,
        distance_cm: f32,
        speed_pct: f32,
    ) {
        self.adaptive.push((distance_cm, speed_pct));
    }

    fn on_reverse_finished(
        &mut self,
        report: &ReverseReport,
    ) {
        self.reverses.push(*report);
    }

    fn on_turn(
        &mut self,
        direction: TurnDirection,
    ) {
        self.turns.push(direction);
    }
}

/// Echo line driven by the trigger: after each trigger pulse the echo rises
/// `rise_after_us` later and stays high for `width_us`, or never rises when
/// `width_us` is `None`.
#[derive(Clone)]
pub struct EchoScene {
    inner: Rc<RefCell<EchoState>>,
    clock: VirtualClock,
}

struct EchoState {
    trigger_high: bool,
    rise_after_us: u64,
    width_us: Option<u64>,
    window: Option<(u64, u64)>,
}

impl EchoScene {
    pub fn new(
        clock: &VirtualClock,
        rise_after_us: u64,
        width_us: Option<u64>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EchoState {
                trigger_high: false,
                rise_after_us,
                width_us,
                window: None,
            })),
            clock: clock.clone(),
        }
    }

    pub fn set_width_us(
        &self,
        width_us: Option<u64>,
    ) {
        self.inner.borrow_mut().width_us = width_us;
    }

    pub fn trigger(&self) -> SceneTrigger {
        SceneTrigger(self.clone())
    }

    pub fn echo(&self) -> SceneEcho {
        SceneEcho(self.clone())
    }
}

pub struct SceneTrigger(EchoScene);
pub struct SceneEcho(EchoScene);

impl DigitalErrorType for SceneTrigger {
    type Error = Infallible;
}

impl OutputPin for SceneTrigger {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let now = self.0.clock.peek_micros();
        let mut state = self.0.inner.borrow_mut();
        if state.trigger_high {
            let rise = now + state.rise_after_us;
            state.window = state.width_us.map(|w| (rise, rise + w));
        }
        state.trigger_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.inner.borrow_mut().trigger_high = true;
        Ok(())
    }
}

impl DigitalErrorType for SceneEcho {
    type Error = Infallible;
}

impl InputPin for SceneEcho {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let now = self.0.clock.peek_micros();
        Ok(self
            .0
            .inner
            .borrow()
            .window
            .is_some_and(|(rise, fall)| now >= rise && now < fall))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}
