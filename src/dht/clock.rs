//! Monotonic time source for edge timing and protocol delays.

use std::thread;
use std::time::{Duration, Instant};

/// Delays shorter than this are busy-waited; longer ones go to the scheduler.
const SPIN_LIMIT: Duration = Duration::from_millis(1);

/// Monotonic clock with microsecond resolution.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
    /// Block for at least `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// [`Clock`] backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
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

    fn sleep(&mut self, duration: Duration) {
        if duration >= SPIN_LIMIT {
            thread::sleep(duration);
            return;
        }
        // Sub-millisecond holds must not hand the core back to the scheduler.
        let until = Instant::now() + duration;
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}
