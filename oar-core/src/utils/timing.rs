//! Timing primitives for the drive stack.
//!
//! Every wait in the controller is bounded: the echo wait by [`poll_until`],
//! ramp steps and pauses by the [`Clock`] delays. Tests substitute a virtual
//! clock so none of them block for real.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;

/// Monotonic time source with blocking delays.
///
/// `sleep_millis`/`sleep_micros` are the `delay_ms`/`delay_us` methods of
/// [`DelayNs`].
pub trait Clock: DelayNs {
    /// Microseconds since an arbitrary, fixed epoch.
    fn now_micros(&self) -> u64;

    fn now_millis(&self) -> u64 {
        self.now_micros() / 1_000
    }
}

/// [`Clock`] backed by the embassy time driver of the running firmware.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl DelayNs for EmbassyClock {
    #[inline]
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        embassy_time::block_for(Duration::from_micros(u64::from(ns).div_ceil(1_000)));
    }

    #[inline]
    fn delay_us(
        &mut self,
        us: u32,
    ) {
        embassy_time::block_for(Duration::from_micros(u64::from(us)));
    }

    #[inline]
    fn delay_ms(
        &mut self,
        ms: u32,
    ) {
        embassy_time::block_for(Duration::from_millis(u64::from(ms)));
    }
}

impl Clock for EmbassyClock {
    #[inline]
    fn now_micros(&self) -> u64 {
        Instant::now().as_micros()
    }
}

/// Repeat `check` until it returns `true` or `timeout_us` has elapsed.
///
/// Returns `Ok(true)` when the condition was met in time and `Ok(false)` on
/// timeout. The clock must advance on its own between reads.
pub fn poll_until<C, E, F>(
    clock: &C,
    timeout_us: u64,
    mut check: F,
) -> Result<bool, E>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<bool, E>,
{
    let start = clock.now_micros();
    loop {
        if check()? {
            return Ok(true);
        }
        if clock.now_micros().saturating_sub(start) > timeout_us {
            return Ok(false);
        }
    }
}

/// Cooperative cancellation flag.
///
/// Raised from an interrupt, a signal handler or another thread; observed by
/// the drivetrain between ramp steps and pause slices and by the supervisor
/// between cycles.
pub struct Shutdown {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Shutdown {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Request an orderly stop.
    pub fn request(&self) {
        self.signal.signal(());
    }

    pub fn is_requested(&self) -> bool {
        self.signal.signaled()
    }

    /// Withdraw a pending request, e.g. before starting another run.
    pub fn clear(&self) {
        self.signal.reset();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// Clock that advances a fixed step on every read.
    struct SteppingClock {
        now: Cell<u64>,
        step_us: u64,
    }

    impl DelayNs for SteppingClock {
        fn delay_ns(
            &mut self,
            ns: u32,
        ) {
            self.now.set(self.now.get() + u64::from(ns) / 1_000);
        }
    }

    impl Clock for SteppingClock {
        fn now_micros(&self) -> u64 {
            let t = self.now.get() + self.step_us;
            self.now.set(t);
            t
        }
    }

    #[test]
    fn poll_until_reports_success_before_deadline() {
        let clock = SteppingClock {
            now: Cell::new(0),
            step_us: 10,
        };
        let mut polls = 0;
        let met = poll_until(&clock, 1_000, || -> Result<bool, ()> {
            polls += 1;
            Ok(polls == 5)
        });
        assert_eq!(met, Ok(true));
        assert_eq!(polls, 5);
    }

    #[test]
    fn poll_until_gives_up_after_timeout() {
        let clock = SteppingClock {
            now: Cell::new(0),
            step_us: 100,
        };
        let met = poll_until(&clock, 1_000, || -> Result<bool, ()> { Ok(false) });
        assert_eq!(met, Ok(false));
        // start read plus at most timeout/step + 1 reads
        assert!(clock.now.get() <= 1_200);
    }

    #[test]
    fn poll_until_propagates_errors() {
        let clock = SteppingClock {
            now: Cell::new(0),
            step_us: 1,
        };
        let met = poll_until(&clock, 1_000, || -> Result<bool, &str> { Err("bus") });
        assert_eq!(met, Err("bus"));
    }

    #[test]
    fn now_millis_derives_from_micros() {
        let clock = SteppingClock {
            now: Cell::new(2_499_000),
            step_us: 1_000,
        };
        assert_eq!(clock.now_millis(), 2_500);
    }

    #[test]
    fn shutdown_request_and_clear() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        shutdown.request();
        assert!(shutdown.is_requested());
        // observing does not consume the request
        assert!(shutdown.is_requested());
        shutdown.clear();
        assert!(!shutdown.is_requested());
    }

    #[test]
    fn embassy_clock_advances_across_delay() {
        let mut clock = EmbassyClock;
        let before = clock.now_micros();
        clock.delay_ms(2);
        assert!(clock.now_micros() >= before + 2_000);
    }
}
