// Reconnect manager
// After a loss: wait out the backoff, ask the source to reconnect, give it a
// grace period, then verify with a probe. Gives up after max attempts.

use serde::Serialize;

use crate::config::ConnectionConfig;
use crate::constants::PROBE_TIMEOUT_MS;
use crate::timer::Deadline;

use super::ProbeTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectParams {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
    pub grace_ms: u64,
    pub verify_timeout_ms: u64,
}

impl ReconnectParams {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            max_attempts: config.max_reconnect_attempts,
            grace_ms: config.reconnect_grace_ms,
            verify_timeout_ms: config.probe_timeout_ms.min(PROBE_TIMEOUT_MS),
        }
    }
}

/// min(base * 2^attempt, max)
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconnectPhase {
    Connected,
    Backoff,
    AwaitingGrace,
    Verifying,
    Exhausted,
}

/// Work the supervisor must do on behalf of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Call FrameSource::reconnect
    Reconnect,
    /// Run a verification probe and report back with this ticket
    Probe(ProbeTicket),
    /// The verification probe never answered
    Outcome(ReconnectOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Restored { attempts: u32 },
    Rescheduled { attempt: u32, delay_ms: u64 },
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
enum State {
    Connected,
    Backoff { timer: Deadline },
    AwaitingGrace { timer: Deadline },
    Verifying { seq: u64, timeout: Deadline },
    Exhausted,
}

pub struct ReconnectManager {
    params: ReconnectParams,
    state: State,
    attempt: u32,
    next_seq: u64,
}

impl ReconnectManager {
    pub fn new(params: ReconnectParams) -> Self {
        Self {
            params,
            state: State::Connected,
            attempt: 0,
            next_seq: 0,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        match self.state {
            State::Connected => ReconnectPhase::Connected,
            State::Backoff { .. } => ReconnectPhase::Backoff,
            State::AwaitingGrace { .. } => ReconnectPhase::AwaitingGrace,
            State::Verifying { .. } => ReconnectPhase::Verifying,
            State::Exhausted => ReconnectPhase::Exhausted,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(
            self.state,
            State::Backoff { .. } | State::AwaitingGrace { .. } | State::Verifying { .. }
        )
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match &self.state {
            State::Backoff { timer } | State::AwaitingGrace { timer } => timer.at(),
            State::Verifying { timeout, .. } => timeout.at(),
            _ => None,
        }
    }

    /// Begin recovery. Ignored while already recovering or exhausted.
    pub fn on_connection_lost(&mut self, now: u64) -> Option<ReconnectOutcome> {
        if !matches!(self.state, State::Connected) {
            return None;
        }
        log::warn!("Connection lost, starting reconnect");
        Some(self.schedule(now))
    }

    pub fn poll(&mut self, now: u64) -> Option<ReconnectAction> {
        let fired = match &mut self.state {
            State::Backoff { timer } | State::AwaitingGrace { timer } => timer.fire(now),
            State::Verifying { timeout, .. } => timeout.fire(now),
            _ => false,
        };
        if !fired {
            return None;
        }

        match self.state {
            State::Backoff { .. } => {
                log::info!("Reconnect attempt {}", self.attempt + 1);
                let mut timer = Deadline::new();
                timer.arm_in(now, self.params.grace_ms);
                self.state = State::AwaitingGrace { timer };
                Some(ReconnectAction::Reconnect)
            }
            State::AwaitingGrace { .. } => {
                self.next_seq += 1;
                let mut timeout = Deadline::new();
                timeout.arm_in(now, self.params.verify_timeout_ms);
                self.state = State::Verifying {
                    seq: self.next_seq,
                    timeout,
                };
                Some(ReconnectAction::Probe(ProbeTicket { seq: self.next_seq }))
            }
            State::Verifying { seq, .. } => {
                log::warn!("Reconnect verification probe #{} timed out", seq);
                Some(ReconnectAction::Outcome(self.fail(now)))
            }
            _ => None,
        }
    }

    /// Result of a verification probe. Results for other tickets are ignored.
    pub fn on_probe_result(&mut self, now: u64, ticket: ProbeTicket, success: bool) -> Option<ReconnectOutcome> {
        match self.state {
            State::Verifying { seq, .. } if seq == ticket.seq => {}
            _ => return None,
        }

        if success {
            let attempts = self.attempt + 1;
            log::info!("Connection restored after {} attempt(s)", attempts);
            self.attempt = 0;
            self.state = State::Connected;
            Some(ReconnectOutcome::Restored { attempts })
        } else {
            Some(self.fail(now))
        }
    }

    /// Restart recovery from attempt 0, from any state. The source is reconnected on the next poll.
    pub fn force_reconnect(&mut self, now: u64) {
        log::info!("Forced reconnect");
        self.attempt = 0;
        let mut timer = Deadline::new();
        timer.arm(now);
        self.state = State::Backoff { timer };
    }

    /// Zero the counter. An exhausted manager stays exhausted.
    pub fn reset_attempts(&mut self) {
        self.attempt = 0;
    }

    /// Disarm all timers and return to Connected.
    pub fn stop(&mut self) {
        self.state = State::Connected;
    }

    fn fail(&mut self, now: u64) -> ReconnectOutcome {
        self.attempt = self.attempt.saturating_add(1);
        self.schedule(now)
    }

    fn schedule(&mut self, now: u64) -> ReconnectOutcome {
        if self.attempt >= self.params.max_attempts {
            log::error!("Giving up after {} reconnect attempts", self.attempt);
            self.state = State::Exhausted;
            return ReconnectOutcome::Exhausted { attempts: self.attempt };
        }

        let delay_ms = backoff_delay(self.params.base_backoff_ms, self.params.max_backoff_ms, self.attempt);
        log::info!(
            "Reconnect attempt {} in {} ms",
            self.attempt + 1,
            delay_ms
        );
        let mut timer = Deadline::new();
        timer.arm_in(now, delay_ms);
        self.state = State::Backoff { timer };
        ReconnectOutcome::Rescheduled {
            attempt: self.attempt,
            delay_ms,
        }
    }
}
