//! Monotonic time for duration measurement.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time provider.
///
/// Readings are durations since an arbitrary fixed origin; only differences
/// between readings are meaningful. The production implementation is
/// [`MonotonicClock`]; tests drive a manually advanced clock from
/// [`crate::testing`].
pub trait TimeSource: Send + Sync {
    /// Current reading of the clock.
    fn now(&self) -> Duration;
}

/// Monotonic clock anchored at its creation instant.
#[derive(Debug)]
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

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Elapsed-time measurement against a [`TimeSource`].
pub struct Stopwatch {
    source: Arc<dyn TimeSource>,
    started: Duration,
}

impl Stopwatch {
    /// Start measuring from the source's current reading.
    pub fn start(source: Arc<dyn TimeSource>) -> Self {
        let started = source.now();
        Self { source, started }
    }

    /// Time elapsed since the stopwatch was started.
    pub fn elapsed(&self) -> Duration {
        self.source.now().saturating_sub(self.started)
    }
}
