//! Monotonic clocks for loop deadlines
//!
//! Time is measured as a `Duration` since the clock's origin. The event loop
//! never reads wall-clock time directly; it asks its clock, which lets tests
//! run against simulated time that jumps straight to the next timer.

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Longest single sleep taken by [`SystemClock::idle_until`]
///
/// Keeps the loop responsive to input arriving from other threads.
pub const IDLE_SLICE: Duration = Duration::from_millis(1);

/// Source of monotonic time for an event loop
pub trait Clock {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Let time pass toward `deadline` while the loop has nothing to run
    ///
    /// May return before `deadline` is reached; callers re-check their state.
    fn idle_until(&self, deadline: Duration);

    /// Whether time only moves when the loop moves it
    fn is_virtual(&self) -> bool;
}

/// Real monotonic time backed by `Instant`
#[derive(Debug)]
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

    fn idle_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep((deadline - now).min(IDLE_SLICE));
        }
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

/// Simulated time
///
/// Starts at zero and only moves forward when the loop idles (jumping to the
/// next deadline) or when a test calls [`VirtualClock::advance`].
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn idle_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// Which clock a harness should be built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    /// Real monotonic time
    #[default]
    System,
    /// Simulated time
    Virtual,
}

impl ClockKind {
    /// Build a fresh clock of this kind
    pub fn build(self) -> std::rc::Rc<dyn Clock> {
        match self {
            ClockKind::System => std::rc::Rc::new(SystemClock::new()),
            ClockKind::Virtual => std::rc::Rc::new(VirtualClock::new()),
        }
    }
}

impl FromStr for ClockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" | "real" => Ok(ClockKind::System),
            "virtual" | "simulated" => Ok(ClockKind::Virtual),
            other => Err(format!(
                "unknown clock '{}', expected 'system' or 'virtual'",
                other
            )),
        }
    }
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockKind::System => write!(f, "system"),
            ClockKind::Virtual => write!(f, "virtual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_clock_jumps_to_deadline() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.idle_until(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(250));

        // Never moves backwards
        clock.idle_until(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(250));
    }

    #[test]
    fn test_virtual_clock_advance() {
        let clock = VirtualClock::new();
        clock.advance(Duration::from_millis(5));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(10));
        assert!(clock.is_virtual());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.idle_until(a + Duration::from_millis(1));
        assert!(clock.now() >= a);
        assert!(!clock.is_virtual());
    }

    #[test]
    fn test_clock_kind_parse() {
        assert_eq!("virtual".parse::<ClockKind>(), Ok(ClockKind::Virtual));
        assert_eq!("SYSTEM".parse::<ClockKind>(), Ok(ClockKind::System));
        assert!("sundial".parse::<ClockKind>().is_err());
        assert_eq!(ClockKind::Virtual.to_string(), "virtual");
    }
}
