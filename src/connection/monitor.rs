// Connection monitor
// Issues health probes on an interval, one at a time, and tracks quality.
// The probe itself runs elsewhere; the monitor only hands out tickets and
// consumes results.

use crate::config::ConnectionConfig;
use crate::timer::{Deadline, Interval};

use super::{ConnectionState, ProbeOutcome, ProbeTicket, Quality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorParams {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub stable_threshold: u32,
    pub stop_on_stable: bool,
}

impl MonitorParams {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            interval_ms: config.connection_check_interval_ms,
            timeout_ms: config.probe_timeout_ms,
            stable_threshold: config.stable_threshold,
            stop_on_stable: config.stop_on_stable,
        }
    }
}

/// Quality change, reported whenever the bucket differs from the last result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTransition {
    /// None for the very first result
    pub previous: Option<Quality>,
    pub current: Quality,
    pub latency_ms: Option<u64>,
}

impl QualityTransition {
    /// Entered Disconnected from anything else, including the unknown start state
    pub fn is_loss(&self) -> bool {
        self.current == Quality::Disconnected && self.previous != Some(Quality::Disconnected)
    }

    pub fn is_restore(&self) -> bool {
        self.previous == Some(Quality::Disconnected) && self.current.is_connected()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MonitorPoll {
    /// Start this probe
    pub probe: Option<ProbeTicket>,
    /// Produced when an in-flight probe timed out
    pub transition: Option<QualityTransition>,
}

struct InFlight {
    seq: u64,
    timeout: Deadline,
}

pub struct ConnectionMonitor {
    params: MonitorParams,
    interval: Interval,
    in_flight: Option<InFlight>,
    next_seq: u64,
    state: ConnectionState,
    last_quality: Option<Quality>,
    consecutive_successes: u32,
    paused_stable: bool,
}

impl ConnectionMonitor {
    pub fn new(params: MonitorParams) -> Self {
        Self {
            params,
            interval: Interval::new(params.interval_ms),
            in_flight: None,
            next_seq: 0,
            state: ConnectionState::default(),
            last_quality: None,
            consecutive_successes: 0,
            paused_stable: false,
        }
    }

    /// Start polling; the first probe is due immediately.
    pub fn start(&mut self, now: u64) {
        self.paused_stable = false;
        self.interval.start(now);
    }

    /// Disarm the interval and forget any in-flight probe.
    pub fn stop(&mut self) {
        self.interval.stop();
        self.in_flight = None;
    }

    /// Pause periodic probes while someone else owns recovery
    pub fn suspend(&mut self) {
        self.interval.stop();
        self.in_flight = None;
    }

    pub fn resume(&mut self, now: u64) {
        if !self.interval.is_running() {
            self.interval.start(now.saturating_add(self.params.interval_ms));
        }
    }

    pub fn is_polling(&self) -> bool {
        self.interval.is_running()
    }

    pub fn is_paused_stable(&self) -> bool {
        self.paused_stable
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_reconnect_attempts(&mut self, attempts: u32) {
        self.state.reconnect_attempts = attempts;
    }

    pub fn next_deadline(&self) -> Option<u64> {
        let timeout = self.in_flight.as_ref().and_then(|f| f.timeout.at());
        match (self.interval.next_deadline(), timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll(&mut self, now: u64) -> MonitorPoll {
        let mut result = MonitorPoll::default();

        let timed_out = match &mut self.in_flight {
            Some(flight) => flight.timeout.fire(now),
            None => false,
        };
        if timed_out {
            if let Some(flight) = self.in_flight.take() {
                log::warn!("Health probe #{} timed out", flight.seq);
            }
            result.transition = self.observe(ProbeOutcome::failed());
        }

        if self.interval.poll(now) {
            if self.in_flight.is_some() {
                log::debug!("Previous health probe still running, skipping tick");
            } else {
                result.probe = Some(self.issue(now));
            }
        }

        result
    }

    /// Pair a finished probe with its ticket. Stale results are ignored.
    pub fn on_probe_result(&mut self, ticket: ProbeTicket, outcome: ProbeOutcome) -> Option<QualityTransition> {
        match &self.in_flight {
            Some(flight) if flight.seq == ticket.seq => {
                self.in_flight = None;
                self.observe(outcome)
            }
            _ => {
                log::debug!("Ignoring stale probe result #{}", ticket.seq);
                None
            }
        }
    }

    /// Fold a probe outcome into the connection state.
    /// Also used for probes issued by the reconnect manager.
    pub fn observe(&mut self, outcome: ProbeOutcome) -> Option<QualityTransition> {
        let quality = outcome.quality();

        if outcome.success {
            self.state.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.state.latency_ms = outcome.latency_ms;
        } else {
            self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            self.state.latency_ms = None;
        }
        self.state.quality = quality;

        if self.params.stop_on_stable
            && outcome.success
            && self.consecutive_successes >= self.params.stable_threshold
            && self.interval.is_running()
        {
            log::info!(
                "Connection stable after {} good probes, pausing checks",
                self.consecutive_successes
            );
            self.interval.stop();
            self.paused_stable = true;
        }

        let previous = self.last_quality;
        if previous == Some(quality) {
            return None;
        }
        self.last_quality = Some(quality);
        log::info!(
            "Connection quality {} -> {}",
            previous.map_or("unknown", |q| q.as_str()),
            quality
        );
        Some(QualityTransition {
            previous,
            current: quality,
            latency_ms: outcome.latency_ms,
        })
    }

    /// Probe now, resuming polling if it was paused
    pub fn force_check(&mut self, now: u64) {
        self.paused_stable = false;
        self.interval.start(now);
    }

    /// The caller knows the link came back; restart stability counting and poll now
    pub fn back_online(&mut self, now: u64) {
        self.consecutive_successes = 0;
        self.force_check(now);
    }

    fn issue(&mut self, now: u64) -> ProbeTicket {
        self.next_seq += 1;
        let mut timeout = Deadline::new();
        timeout.arm_in(now, self.params.timeout_ms);
        self.in_flight = Some(InFlight {
            seq: self.next_seq,
            timeout,
        });
        ProbeTicket { seq: self.next_seq }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MonitorParams {
        MonitorParams {
            interval_ms: 10_000,
            timeout_ms: 5_000,
            stable_threshold: 3,
            stop_on_stable: false,
        }
    }

    fn started(params: MonitorParams) -> ConnectionMonitor {
        let mut m = ConnectionMonitor::new(params);
        m.start(0);
        m
    }

    #[test]
    fn test_first_result_always_reports() {
        let mut m = started(params());
        let ticket = m.poll(0).probe.unwrap();
        let t = m.on_probe_result(ticket, ProbeOutcome::ok(50)).unwrap();
        assert_eq!(t.previous, None);
        assert_eq!(t.current, Quality::Excellent);
        assert!(!t.is_loss());
    }

    #[test]
    fn test_initially_unreachable_counts_as_loss() {
        let mut m = started(params());
        let ticket = m.poll(0).probe.unwrap();
        let t = m.on_probe_result(ticket, ProbeOutcome::failed()).unwrap();
        assert!(t.is_loss());
        assert_eq!(m.state().consecutive_failures, 1);
    }

    #[test]
    fn test_same_quality_is_silent() {
        let mut m = started(params());
        let first = m.poll(0).probe.unwrap();
        m.on_probe_result(first, ProbeOutcome::ok(150));
        let second = m.poll(10_000).probe.unwrap();
        assert!(m.on_probe_result(second, ProbeOutcome::ok(200)).is_none());
        let third = m.poll(20_000).probe.unwrap();
        let t = m.on_probe_result(third, ProbeOutcome::ok(400)).unwrap();
        assert_eq!(t.previous, Some(Quality::Good));
        assert_eq!(t.current, Quality::Poor);
        assert_eq!(m.state().latency_ms, Some(400));
    }

    #[test]
    fn test_single_probe_in_flight() {
        let mut m = started(MonitorParams {
            interval_ms: 2_000,
            ..params()
        });
        let first = m.poll(0).probe.unwrap();
        // Interval fires again but the first probe is still out
        assert!(m.poll(2_000).probe.is_none());
        assert!(m.on_probe_result(first, ProbeOutcome::ok(10)).is_some());
        assert!(m.poll(4_000).probe.is_some());
    }

    #[test]
    fn test_timeout_fails_locally_and_drops_late_result() {
        let mut m = started(params());
        let ticket = m.poll(0).probe.unwrap();
        assert_eq!(m.next_deadline(), Some(5_000));

        let polled = m.poll(5_000);
        let t = polled.transition.unwrap();
        assert_eq!(t.current, Quality::Disconnected);

        assert!(m.on_probe_result(ticket, ProbeOutcome::ok(10)).is_none());
        assert_eq!(m.state().quality, Quality::Disconnected);
    }

    #[test]
    fn test_stop_on_stable_pauses_until_forced() {
        let mut m = started(MonitorParams {
            stop_on_stable: true,
            ..params()
        });
        for i in 0..3u64 {
            let ticket = m.poll(i * 10_000).probe.unwrap();
            m.on_probe_result(ticket, ProbeOutcome::ok(20));
        }
        assert!(m.is_paused_stable());
        assert!(!m.is_polling());
        assert_eq!(m.next_deadline(), None);
        assert!(m.poll(100_000).probe.is_none());

        m.force_check(100_000);
        assert!(m.poll(100_000).probe.is_some());
    }

    #[test]
    fn test_back_online_restarts_stability_count() {
        let mut m = started(MonitorParams {
            stop_on_stable: true,
            ..params()
        });
        for i in 0..3u64 {
            let ticket = m.poll(i * 10_000).probe.unwrap();
            m.on_probe_result(ticket, ProbeOutcome::ok(20));
        }
        m.back_online(50_000);
        let ticket = m.poll(50_000).probe.unwrap();
        m.on_probe_result(ticket, ProbeOutcome::ok(20));
        assert!(m.is_polling());
    }

    #[test]
    fn test_stop_disarms_everything() {
        let mut m = started(params());
        m.poll(0);
        m.stop();
        m.stop();
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.poll(60_000), MonitorPoll::default());
    }
}
