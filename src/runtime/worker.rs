// Probe worker -- runs health probes off the supervisor thread.
//
// One thread serves both the connection monitor and the reconnect manager,
// so at most one probe is ever on the wire. Results are posted back to the
// supervisor inbox tagged with the ticket they answer.

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::connection::{ProbeOutcome, ProbeTicket, Prober};
use crate::error::{PorchlightError, Result};

use super::Message;

/// Which state machine asked for the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrigin {
    Monitor,
    Reconnect,
}

struct ProbeRequest {
    origin: ProbeOrigin,
    ticket: ProbeTicket,
    timeout: Duration,
}

pub struct ProbeWorker {
    tx: Option<Sender<ProbeRequest>>,
    handle: Option<JoinHandle<()>>,
    describe: String,
}

impl ProbeWorker {
    pub fn spawn(mut prober: Box<dyn Prober>, inbox: Sender<Message>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<ProbeRequest>();
        let describe = prober.describe();

        let handle = std::thread::Builder::new()
            .name("probe-worker".into())
            .spawn(move || {
                for request in rx {
                    // Catch panics so the thread never dies
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        prober.probe(request.timeout)
                    }))
                    .unwrap_or_else(|_| {
                        log::error!("Probe panicked, counting it as a failure");
                        ProbeOutcome::failed()
                    });

                    let delivered = inbox.send(Message::ProbeDone {
                        origin: request.origin,
                        ticket: request.ticket,
                        outcome,
                    });
                    if delivered.is_err() {
                        break;
                    }
                }
                log::debug!("Probe worker stopped");
            })
            .map_err(|e| PorchlightError::Other(format!("Failed to spawn probe worker: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            describe,
        })
    }

    pub fn request(&self, origin: ProbeOrigin, ticket: ProbeTicket, timeout: Duration) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(ProbeRequest { origin, ticket, timeout }).is_err() {
            log::warn!("Probe worker is gone, probe #{} dropped", ticket.seq);
        }
    }

    pub fn describe(&self) -> &str {
        &self.describe
    }

    /// Stop after the current probe. Idempotent.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Probe worker thread panicked");
            }
        }
    }
}

impl Drop for ProbeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OnlineFlagProber;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct PanickingProber;

    impl Prober for PanickingProber {
        fn probe(&mut self, _timeout: Duration) -> ProbeOutcome {
            panic!("probe exploded");
        }

        fn describe(&self) -> String {
            "panicking".to_string()
        }
    }

    #[test]
    fn test_results_carry_origin_and_ticket() {
        let (inbox, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(true));
        let mut worker = ProbeWorker::spawn(Box::new(OnlineFlagProber::new(flag)), inbox).unwrap();

        worker.request(ProbeOrigin::Reconnect, ProbeTicket { seq: 7 }, Duration::from_secs(1));
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Message::ProbeDone { origin, ticket, outcome }) => {
                assert_eq!(origin, ProbeOrigin::Reconnect);
                assert_eq!(ticket.seq, 7);
                assert!(outcome.success);
            }
            _ => panic!("expected ProbeDone"),
        }
        worker.shutdown();
    }

    #[test]
    fn test_panicking_prober_reports_failure() {
        let (inbox, rx) = mpsc::channel();
        let mut worker = ProbeWorker::spawn(Box::new(PanickingProber), inbox).unwrap();

        worker.request(ProbeOrigin::Monitor, ProbeTicket { seq: 1 }, Duration::from_secs(1));
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Message::ProbeDone { outcome, .. }) => assert!(!outcome.success),
            _ => panic!("expected ProbeDone"),
        }
        worker.shutdown();
        worker.shutdown();
    }
}
