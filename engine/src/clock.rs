//! Time sources for the timer tier.
//!
//! Time is measured as a `Duration` since the loop was created, which keeps
//! timer deadlines comparable across both clocks.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// What the loop should do when nothing is runnable before the next deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    /// Block for up to this long, still accepting I/O completions.
    Wait(Duration),
    /// The clock moved itself to the deadline; continue immediately.
    Advanced,
}

pub trait Clock {
    /// Time elapsed since the loop started.
    fn now(&self) -> Duration;

    /// Called when the next runnable timer is due at `deadline`.
    fn idle_until(&self, deadline: Duration) -> Idle;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
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

    fn idle_until(&self, deadline: Duration) -> Idle {
        Idle::Wait(deadline.saturating_sub(self.now()))
    }
}

/// Simulated time that only moves when the loop idles or a test advances it.
///
/// Runs are deterministic: a one-hour timer fires as soon as everything
/// before it has drained.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Duration>,
}

impl VirtualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_by(&self, delta: Duration) {
        self.now.set(self.now.get().saturating_add(delta));
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn idle_until(&self, deadline: Duration) -> Idle {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
        Idle::Advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_jumps_forward_only() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        assert_eq!(clock.idle_until(Duration::from_millis(250)), Idle::Advanced);
        assert_eq!(clock.now(), Duration::from_millis(250));

        clock.idle_until(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(250));

        clock.advance_by(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_millis(1250));
    }

    #[test]
    fn system_clock_waits_for_remaining_time() {
        let clock = SystemClock::new();
        match clock.idle_until(Duration::from_secs(3600)) {
            Idle::Wait(remaining) => {
                assert!(remaining > Duration::from_secs(3500));
                assert!(remaining <= Duration::from_secs(3600));
            }
            Idle::Advanced => panic!("system clock never advances itself"),
        }
        assert_eq!(clock.idle_until(Duration::ZERO), Idle::Wait(Duration::ZERO));
    }
}
