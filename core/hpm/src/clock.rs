//! Wall clock and blocking waits.

use std::time::{Duration, SystemTime};

/// Source of time for the sampling loop.
///
/// The measurement window is the only place where the engine blocks,
/// and it always blocks through this trait.
pub trait Clock {
    /// Returns the current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Suspends the current thread for the given duration.
    fn sleep(&self, duration: Duration);
}

/// The system clock, with [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
