//! Test doubles for the telemetry runtime.

use std::time::Duration;

use parking_lot::Mutex;

use crate::time::TimeSource;

/// Manually advanced clock for deterministic duration assertions.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl TimeSource for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_and_accumulates() {
        let clock = FakeClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(30));
        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(130));
    }
}
