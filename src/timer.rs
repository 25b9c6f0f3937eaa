// Single-timer primitives
//
// Every component owns its timers as plain values. Nothing fires on its own:
// the supervisor asks each component for its next deadline, sleeps until the
// earliest one, then polls. Disarming is a synchronous field write, so stop()
// can never leave a timer behind.

/// One-shot deadline in monotonic milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<u64>,
}

impl Deadline {
    pub fn new() -> Self {
        Self { at: None }
    }

    pub fn arm(&mut self, at: u64) {
        self.at = Some(at);
    }

    pub fn arm_in(&mut self, now: u64, delay_ms: u64) {
        self.at = Some(now.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn at(&self) -> Option<u64> {
        self.at
    }

    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.at, Some(at) if now >= at)
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire(&mut self, now: u64) -> bool {
        if self.is_due(now) {
            self.at = None;
            true
        } else {
            false
        }
    }
}

/// Fixed-period repeating timer.
///
/// Overdue ticks are coalesced: if the owner comes back late, one tick fires
/// and the schedule jumps forward instead of replaying every missed period.
#[derive(Debug, Clone)]
pub struct Interval {
    period_ms: u64,
    next: Deadline,
    missed: u64,
}

impl Interval {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next: Deadline::new(),
            missed: 0,
        }
    }

    /// First tick fires immediately.
    pub fn start(&mut self, now: u64) {
        self.next.arm(now);
    }

    pub fn stop(&mut self) {
        self.next.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.next.is_armed()
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.next.at()
    }

    /// Total ticks dropped because the owner fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn poll(&mut self, now: u64) -> bool {
        let Some(at) = self.next.at() else {
            return false;
        };
        if now < at {
            return false;
        }

        let mut next = at.saturating_add(self.period_ms);
        if next <= now {
            let behind = (now - at) / self.period_ms;
            self.missed += behind;
            next = at.saturating_add((behind + 1) * self.period_ms);
        }
        self.next.arm(next);
        true
    }
}
