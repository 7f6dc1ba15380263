//! Frame timebase and single-owner deadlines
//!
//! Animation components never read the wall clock themselves; the owner of
//! the render loop samples a [`FrameClock`] once per tick and hands the
//! millisecond value down, which keeps every component deterministic under test.

use std::sync::Arc;
use std::time::Instant;

/// Monotonic clock for animation ticks
///
/// All tick timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Arc<Instant>,
}

impl FrameClock {
    /// Create a new frame clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a frame clock from an existing start instant
    ///
    /// Use this to share the same timebase between components.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Milliseconds elapsed since clock creation
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Seconds elapsed since clock creation
    #[inline]
    pub fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Get the start instant for sharing with other components
    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot timer owned by exactly one component.
///
/// A deadline fires at most once: [`Deadline::fire`] disarms it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at_ms: Option<u64>,
}

impl Deadline {
    pub fn disarmed() -> Self {
        Self { at_ms: None }
    }

    /// Arm (or re-arm) the deadline, replacing any pending one.
    pub fn arm(&mut self, at_ms: u64) {
        self.at_ms = Some(at_ms);
    }

    pub fn cancel(&mut self) {
        self.at_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at_ms.is_some()
    }

    pub fn at_ms(&self) -> Option<u64> {
        self.at_ms
    }

    /// Returns true exactly once when `now_ms` has reached the deadline.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.at_ms {
            Some(at) if now_ms >= at => {
                self.at_ms = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_monotonic() {
        let clock = FrameClock::new();
        let t1 = clock.now_secs();
        thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_secs();
        assert!(t2 > t1, "frame clock must be monotonically increasing");
    }

    #[test]
    fn test_shared_clock() {
        let clock1 = FrameClock::new();
        let clock2 = FrameClock::from_instant(clock1.start_instant());
        thread::sleep(Duration::from_millis(5));
        let diff = clock1.now_ms() as i64 - clock2.now_ms() as i64;
        assert!(diff.abs() <= 1);
    }

    #[test]
    fn test_deadline_fires_once() {
        let mut deadline = Deadline::disarmed();
        assert!(!deadline.fire(10));

        deadline.arm(100);
        assert!(!deadline.fire(99));
        assert!(deadline.fire(100));
        assert!(!deadline.fire(200));
        assert!(!deadline.is_armed());
    }

    #[test]
    fn test_deadline_rearm_replaces() {
        let mut deadline = Deadline::disarmed();
        deadline.arm(100);
        deadline.arm(500);
        assert!(!deadline.fire(100));
        assert!(deadline.fire(500));
    }

    #[test]
    fn test_deadline_cancel() {
        let mut deadline = Deadline::disarmed();
        deadline.arm(100);
        deadline.cancel();
        assert!(!deadline.fire(1_000));
    }
}
