//! Clock source
//!
//! Wall-clock reader producing monotonic microsecond timestamps.
//!
//! [`Clock::relative_time`] both reads and advances the checkpoint, so
//! consecutive calls partition time into non-overlapping intervals. Callers
//! that only want to look use [`Clock::now_us`].

use frameloop_common::time::{micros_to_seconds, seconds_to_micros};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Margin left for busy-waiting when softsleep is enabled (assumes 100Hz kernel tick)
pub const SOFTSLEEP_MARGIN: f64 = 0.011;

/// Longest single sleep while idling between iterations
pub const IDLE_SLICE: f64 = 0.020;

/// Source of monotonic time
pub trait TimeSource {
    /// Monotonic microseconds since an arbitrary origin
    fn now_us(&self) -> i64;

    /// Block for `us` microseconds
    fn sleep_us(&self, us: i64);
}

/// Monotonic system time (`Instant`)
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_us(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn sleep_us(&self, us: i64) {
        if us > 0 {
            std::thread::sleep(Duration::from_micros(us as u64));
        }
    }
}

/// Manually advanced time for simulation and tests.
///
/// Clones share the same timeline, so a backend holding a clone observes
/// every advance. Sleeping advances time instantly.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Rc<Cell<i64>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `us` microseconds (negative values are ignored)
    pub fn advance_us(&self, us: i64) {
        if us > 0 {
            self.now.set(self.now.get().saturating_add(us));
        }
    }

    /// Move time forward by `seconds`
    pub fn advance(&self, seconds: f64) {
        self.advance_us(seconds_to_micros(seconds));
    }
}

impl TimeSource for ManualTimeSource {
    fn now_us(&self) -> i64 {
        self.now.get()
    }

    fn sleep_us(&self, us: i64) {
        self.advance_us(us);
    }
}

/// Wall clock with a destructive "time since last call" reader
pub struct Clock {
    source: Box<dyn TimeSource>,
    last_us: i64,
}

impl Clock {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        let last_us = source.now_us();
        Self { source, last_us }
    }

    /// Non-destructive read of the current time
    pub fn now_us(&self) -> i64 {
        self.source.now_us()
    }

    /// Current time in seconds
    pub fn now(&self) -> f64 {
        micros_to_seconds(self.now_us())
    }

    /// Microsecond timestamp of the last checkpoint
    pub fn checkpoint_us(&self) -> i64 {
        self.last_us
    }

    /// Seconds elapsed since the previous call; advances the checkpoint.
    ///
    /// Never negative, even if the source misbehaves.
    pub fn relative_time(&mut self) -> f64 {
        let now = self.source.now_us();
        let delta = now.saturating_sub(self.last_us).max(0);
        self.last_us = now.max(self.last_us);
        micros_to_seconds(delta)
    }

    /// Sleep until `time_frame` seconds have passed, measured through
    /// [`relative_time`](Self::relative_time). Returns the remaining
    /// (usually slightly negative) time.
    ///
    /// With `softsleep`, the final [`SOFTSLEEP_MARGIN`] is busy-waited for
    /// precision.
    pub fn timing_sleep(&mut self, mut time_frame: f64, softsleep: bool) -> f64 {
        let margin = if softsleep { SOFTSLEEP_MARGIN } else { 0.0 };
        while time_frame > margin {
            // Sub-microsecond leftovers still have to move the clock
            self.source.sleep_us(seconds_to_micros(time_frame - margin).max(1));
            time_frame -= self.relative_time();
        }
        if softsleep {
            if time_frame < 0.0 {
                warn!("Softsleep underflow: {:.4}s", time_frame);
            }
            while time_frame > 0.0 {
                let elapsed = self.relative_time();
                if elapsed <= 0.0 {
                    // Manual sources never advance on their own
                    self.source.sleep_us(1);
                }
                time_frame -= elapsed;
            }
        }
        time_frame
    }

    /// Idle for up to `seconds` in bounded slices, re-checking elapsed time
    /// after each slice. Does not move the checkpoint.
    pub fn idle(&self, seconds: f64) {
        if !(seconds > 0.0) {
            return;
        }
        let deadline = self.now_us().saturating_add(seconds_to_micros(seconds));
        loop {
            let remaining = deadline.saturating_sub(self.now_us());
            if remaining <= 0 {
                break;
            }
            self.source.sleep_us(remaining.min(seconds_to_micros(IDLE_SLICE)));
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("last_us", &self.last_us)
            .finish_non_exhaustive()
    }
}
