use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A source of show time, measured from an arbitrary origin.
///
/// Implementations should be monotonic, but the engine never trusts that:
/// every reading goes through a [`ClockSampler`].
pub trait Clock: Send {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and offline rendering.
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Set an absolute time. Going backwards is allowed here so tests can
    /// simulate an external clock correction.
    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Samples a [`Clock`] and guarantees the readings never go backwards.
///
/// If the underlying source jumps back, the sampler holds at its last value
/// until the source catches up again, so the computed delta is zero.
pub struct ClockSampler {
    clock: Box<dyn Clock>,
    last: Duration,
}

impl ClockSampler {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let last = clock.now();
        Self { clock, last }
    }

    /// Take a new reading, clamped to be no earlier than the previous one.
    pub fn sample(&mut self) -> Duration {
        let raw = self.clock.now();
        if raw < self.last {
            log::warn!(
                "Clock went backwards by {:?}, holding at {:?}",
                self.last - raw,
                self.last
            );
        } else {
            self.last = raw;
        }
        self.last
    }

    /// Last value returned by [`sample`](Self::sample).
    pub fn last(&self) -> Duration {
        self.last
    }
}
