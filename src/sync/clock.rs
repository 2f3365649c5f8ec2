//! Time sources and the waiting strategy used to hit frame deadlines.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A monotonic time source. `now` is measured from the clock's own origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Virtual time that only moves when slept on or advanced. Lets a whole
/// show run instantly and deterministically.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// How to block until a deadline on a given clock.
pub trait WaitStrategy: Send + Sync {
    fn wait_until(&self, clock: &dyn Clock, target: Duration);
}

/// Sleep for the bulk of the wait, then busy-poll the last `spin_margin`.
#[derive(Clone, Copy, Debug)]
pub struct SleepThenSpin {
    pub spin_margin: Duration,
}

impl Default for SleepThenSpin {
    fn default() -> Self {
        Self {
            spin_margin: Duration::from_millis(1),
        }
    }
}

impl WaitStrategy for SleepThenSpin {
    fn wait_until(&self, clock: &dyn Clock, target: Duration) {
        loop {
            let now = clock.now();
            if now >= target {
                return;
            }
            let remaining = target - now;
            if remaining > self.spin_margin {
                clock.sleep(remaining - self.spin_margin);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Plain sleeping. Cheapest on CPU, jitter is whatever the scheduler gives.
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepOnly;

impl WaitStrategy for SleepOnly {
    fn wait_until(&self, clock: &dyn Clock, target: Duration) {
        let now = clock.now();
        if now < target {
            clock.sleep(target - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_then_spin_never_returns_early() {
        let clock = MonotonicClock::new();
        let strategy = SleepThenSpin::default();
        for ms in [0u64, 3, 7] {
            let target = clock.now() + Duration::from_millis(ms);
            strategy.wait_until(&clock, target);
            let late = clock.now() - target;
            assert!(clock.now() >= target);
            assert!(late < Duration::from_millis(50), "late by {:?}", late);
        }
    }

    #[test]
    fn past_deadlines_return_immediately() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(2));
        SleepOnly.wait_until(&clock, Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn manual_clock_moves_only_when_slept() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        SleepOnly.wait_until(&clock, Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(500));
        clock.sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), Duration::from_millis(520));
    }
}
