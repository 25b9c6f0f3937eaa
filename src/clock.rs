// Clock collaborator
// Monotonic milliseconds drive every timer; wall time is only used for
// timestamps and the schedule gate.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use chrono::{DateTime, Duration, Local, Timelike, Utc};

pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin
    fn now_ms(&self) -> u64;

    /// Current wall-clock time
    fn wall(&self) -> DateTime<Utc>;

    /// Hour of day (0-23) used by the schedule gate
    fn local_hour(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn wall(&self) -> DateTime<Utc> {
        (**self).wall()
    }

    fn local_hour(&self) -> u32 {
        (**self).local_hour()
    }
}

/// Real time: `Instant` for timers, local timezone for the schedule.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Hand-driven clock for tests and simulations.
/// Wall time is `base + elapsed`, and the schedule hour is read in UTC.
pub struct ManualClock {
    ms: Cell<u64>,
    base: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self { ms: Cell::new(0), base }
    }

    /// Clock starting at the given UTC hour today
    pub fn at_hour(hour: u32) -> Self {
        let base = Utc::now()
            .with_hour(hour.min(23))
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .unwrap_or_else(Utc::now);
        Self::new(base)
    }

    pub fn advance(&self, ms: u64) {
        self.ms.set(self.ms.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.ms.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.get()
    }

    fn wall(&self) -> DateTime<Utc> {
        self.base + Duration::milliseconds(self.ms.get() as i64)
    }

    fn local_hour(&self) -> u32 {
        self.wall().hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_wall_and_hour() {
        let clock = ManualClock::at_hour(21);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.local_hour(), 21);

        clock.advance(60 * 60 * 1000);
        assert_eq!(clock.now_ms(), 3_600_000);
        assert_eq!(clock.local_hour(), 22);
    }

    #[test]
    fn test_rc_clock_delegates() {
        let clock = Rc::new(ManualClock::at_hour(3));
        let shared: Rc<ManualClock> = Rc::clone(&clock);
        clock.advance(250);
        assert_eq!(shared.now_ms(), 250);
        assert_eq!(shared.local_hour(), 3);
    }
}
