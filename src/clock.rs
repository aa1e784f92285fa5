//! Time sources for the display loop.
//!
//! Timers run on the monotonic clock; overlay text uses local wall time.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, TimeDelta};

pub trait Clock {
    fn now(&self) -> Instant;
    fn wall(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: NaiveDateTime,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new(wall_origin: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Jump to `elapsed` after the origin.
    pub fn set(&self, elapsed: Duration) {
        self.offset.set(elapsed);
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn wall(&self) -> NaiveDateTime {
        let delta = TimeDelta::from_std(self.offset.get()).unwrap_or(TimeDelta::zero());
        self.wall_origin + delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn clones_share_offset() {
        let wall = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = ManualClock::new(wall);
        let handle = clock.clone();
        handle.advance(Duration::from_secs(61));
        assert_eq!(clock.now() - clock.origin(), Duration::from_secs(61));
        assert_eq!(clock.wall().minute(), 1);
        assert_eq!(clock.wall().second(), 1);
    }
}
