// Supervisor
//
// One thread owns every state machine: detection engine, connection monitor
// and reconnect manager. It sleeps until the earliest deadline or an inbox
// message, fires what is due, and hands blocking work to worker threads
// (probes, SQLite, alerts) which report back through the same inbox.

pub mod worker;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AlertConfig, AppConfig};
use crate::connection::{
    ConnectionMonitor, MonitorParams, ProbeOutcome, ProbeTicket, Prober, Quality, QualityTransition,
    ReconnectAction, ReconnectManager, ReconnectOutcome, ReconnectParams, ReconnectPhase,
};
use crate::constants::MAX_IDLE_WAIT_MS;
use crate::db::EventStore;
use crate::detection::{DebouncePhase, DetectionEngine, EngineStats, MotionTransition};
use crate::error::Result;
use crate::events::{AlertDispatcher, EngineEvent, EventRecorder, EventSink, Notifier};
use crate::source::FrameSource;

pub use worker::{ProbeOrigin, ProbeWorker};

/// Everything that can arrive in the supervisor inbox
pub enum Message {
    ProbeDone {
        origin: ProbeOrigin,
        ticket: ProbeTicket,
        outcome: ProbeOutcome,
    },
    AlertDone {
        event_id: Uuid,
        error: Option<String>,
    },
    Warning(String),
    Control(Control),
}

pub enum Control {
    Stop,
    ForceReconnect,
    ResetAttempts,
    ForceCheck,
    BackOnline,
    Status(Sender<StatusSnapshot>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub source: String,
    pub detecting: bool,
    pub motion_active: bool,
    pub motion_phase: DebouncePhase,
    pub current_score: Option<f64>,
    pub quality: Quality,
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub reconnect_state: ReconnectPhase,
    pub stats: EngineStats,
}

/// Cloneable remote control for a running supervisor
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<Message>,
}

impl ControlHandle {
    fn send(&self, control: Control) -> bool {
        self.tx.send(Message::Control(control)).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.send(Control::Stop)
    }

    pub fn force_reconnect(&self) -> bool {
        self.send(Control::ForceReconnect)
    }

    pub fn reset_attempts(&self) -> bool {
        self.send(Control::ResetAttempts)
    }

    pub fn force_check(&self) -> bool {
        self.send(Control::ForceCheck)
    }

    pub fn back_online(&self) -> bool {
        self.send(Control::BackOnline)
    }

    /// Ask for a snapshot, waiting up to `timeout` for the answer
    pub fn status(&self, timeout: Duration) -> Option<StatusSnapshot> {
        let (tx, rx) = mpsc::channel();
        if !self.send(Control::Status(tx)) {
            return None;
        }
        rx.recv_timeout(timeout).ok()
    }
}

pub struct Supervisor<C: Clock> {
    clock: C,
    engine: DetectionEngine,
    monitor: ConnectionMonitor,
    reconnect: ReconnectManager,
    source: Box<dyn FrameSource>,
    sinks: Vec<Box<dyn EventSink>>,
    recorder: Option<EventRecorder>,
    alerts: Option<AlertDispatcher>,
    probes: Option<ProbeWorker>,
    probe_timeout: Duration,
    acquire_grace_ms: u64,
    inbox: Receiver<Message>,
    inbox_tx: Sender<Message>,
    running: bool,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(config: &AppConfig, clock: C, source: Box<dyn FrameSource>) -> Self {
        let (inbox_tx, inbox) = mpsc::channel();
        Self {
            clock,
            engine: DetectionEngine::from_config(config),
            monitor: ConnectionMonitor::new(MonitorParams::from_config(&config.connection)),
            reconnect: ReconnectManager::new(ReconnectParams::from_config(&config.connection)),
            source,
            sinks: Vec::new(),
            recorder: None,
            alerts: None,
            probes: None,
            probe_timeout: Duration::from_millis(config.connection.probe_timeout_ms),
            acquire_grace_ms: config.connection.reconnect_grace_ms,
            inbox,
            inbox_tx,
            running: false,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn attach_recorder(&mut self, store: Box<dyn EventStore>) -> Result<()> {
        self.recorder = Some(EventRecorder::spawn(store, self.inbox_tx.clone())?);
        Ok(())
    }

    pub fn attach_alerts(&mut self, config: &AlertConfig, notifier: Box<dyn Notifier>) -> Result<()> {
        self.alerts = Some(AlertDispatcher::spawn(config, notifier, self.inbox_tx.clone())?);
        Ok(())
    }

    /// Without a prober the source is assumed reachable and never reconnected.
    pub fn attach_prober(&mut self, prober: Box<dyn Prober>) -> Result<()> {
        self.probes = Some(ProbeWorker::spawn(prober, self.inbox_tx.clone())?);
        Ok(())
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        let now = self.clock.now_ms();
        self.running = true;
        self.engine.start(now);
        match &self.probes {
            Some(probes) => {
                log::info!("Connection checks via {}", probes.describe());
                // The source gets one grace period to produce its first frame
                self.monitor.start(now.saturating_add(self.acquire_grace_ms));
            }
            None => log::info!("No prober attached, connection monitoring is off"),
        }
        log::info!("Watching {}", self.source.describe());
    }

    /// Start, then serve timers and the inbox until stopped.
    pub fn run(&mut self) -> Result<()> {
        self.start();
        while self.running {
            self.tick();
            if !self.running {
                break;
            }
            let now = self.clock.now_ms();
            let wait = self
                .next_deadline()
                .map_or(MAX_IDLE_WAIT_MS, |at| at.saturating_sub(now).min(MAX_IDLE_WAIT_MS));
            self.process_inbox(Duration::from_millis(wait));
        }
        self.shutdown();
        Ok(())
    }

    /// Earliest deadline across all state machines
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.engine.next_deadline(),
            self.monitor.next_deadline(),
            self.reconnect.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fire everything that is due at the current clock reading.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        let wall = self.clock.wall();
        let hour = self.clock.local_hour();

        for transition in self.engine.poll(now, wall, hour, self.source.as_mut()) {
            self.on_motion(transition);
        }

        let polled = self.monitor.poll(now);
        if let Some(transition) = polled.transition {
            self.on_quality(now, transition);
        }
        if let Some(ticket) = polled.probe {
            self.request_probe(ProbeOrigin::Monitor, ticket);
        }

        match self.reconnect.poll(now) {
            Some(ReconnectAction::Reconnect) => {
                if let Err(e) = self.source.reconnect() {
                    self.warn(format!("Reconnect of {} failed: {}", self.source.describe(), e));
                }
            }
            Some(ReconnectAction::Probe(ticket)) => self.request_probe(ProbeOrigin::Reconnect, ticket),
            Some(ReconnectAction::Outcome(outcome)) => {
                if let Some(transition) = self.monitor.observe(ProbeOutcome::failed()) {
                    self.on_quality(now, transition);
                }
                self.on_reconnect_outcome(now, outcome);
            }
            None => {}
        }
    }

    /// Wait up to `wait` for one message, then drain whatever else is queued.
    /// Returns the number of messages handled.
    pub fn process_inbox(&mut self, wait: Duration) -> usize {
        let first = match self.inbox.recv_timeout(wait) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };
        self.handle(first);
        let mut handled = 1;
        while let Ok(msg) = self.inbox.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, msg: Message) {
        let now = self.clock.now_ms();
        match msg {
            Message::ProbeDone {
                origin: ProbeOrigin::Monitor,
                ticket,
                outcome,
            } => {
                if let Some(transition) = self.monitor.on_probe_result(ticket, outcome) {
                    self.on_quality(now, transition);
                }
            }
            Message::ProbeDone {
                origin: ProbeOrigin::Reconnect,
                ticket,
                outcome,
            } => {
                if let Some(result) = self.reconnect.on_probe_result(now, ticket, outcome.success) {
                    if let Some(transition) = self.monitor.observe(outcome) {
                        self.on_quality(now, transition);
                    }
                    self.on_reconnect_outcome(now, result);
                }
            }
            Message::AlertDone { event_id, error: None } => {
                self.engine.mark_notified(event_id);
                if let Some(recorder) = &self.recorder {
                    recorder.mark_notified(event_id);
                }
            }
            Message::AlertDone {
                event_id,
                error: Some(error),
            } => self.warn(format!("Alert for event {} failed: {}", event_id, error)),
            Message::Warning(message) => self.emit(EngineEvent::Warning { message }),
            Message::Control(control) => self.on_control(now, control),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let connection = self.monitor.state();
        StatusSnapshot {
            source: self.source.describe(),
            detecting: self.engine.is_running(),
            motion_active: self.engine.motion_active(),
            motion_phase: self.engine.phase(),
            current_score: self.engine.current_score(),
            quality: connection.quality,
            latency_ms: connection.latency_ms,
            consecutive_failures: connection.consecutive_failures,
            reconnect_attempts: self.reconnect.attempts(),
            reconnect_state: self.reconnect.phase(),
            stats: self.engine.stats(),
        }
    }

    /// Stop every state machine and drain the workers. Idempotent.
    pub fn shutdown(&mut self) {
        self.running = false;
        if let Some(transition) = self.engine.stop(self.clock.wall()) {
            self.on_motion(transition);
        }
        self.monitor.stop();
        self.reconnect.stop();
        self.source.close();

        if let Some(mut probes) = self.probes.take() {
            probes.shutdown();
        }
        if let Some(mut alerts) = self.alerts.take() {
            alerts.shutdown();
        }
        if let Some(mut recorder) = self.recorder.take() {
            recorder.shutdown();
        }
        // Warnings the workers posted while draining
        while let Ok(msg) = self.inbox.try_recv() {
            if let Message::Warning(message) = msg {
                self.emit(EngineEvent::Warning { message });
            }
        }
    }

    fn on_motion(&mut self, transition: MotionTransition) {
        match transition {
            MotionTransition::Detected(event) => {
                self.emit(EngineEvent::MotionDetected {
                    event_id: event.id,
                    level: event.level,
                    started_at: event.started_at,
                });
                if let Some(recorder) = &self.recorder {
                    recorder.open(&event);
                }
                if event.recording_triggered {
                    self.emit(EngineEvent::RecordingRequested { event_id: event.id });
                }
                if let Some(alerts) = &self.alerts {
                    if alerts.is_enabled() {
                        let frame = self.source.current_frame();
                        alerts.dispatch(&event, frame);
                    }
                }
            }
            MotionTransition::Cleared(event) => {
                self.emit(EngineEvent::MotionCleared {
                    event_id: event.id,
                    peak_level: event.peak_level,
                    started_at: event.started_at,
                    cleared_at: event.cleared_at.unwrap_or(event.started_at),
                });
                if let Some(recorder) = &self.recorder {
                    recorder.close(&event);
                }
            }
        }
    }

    fn on_quality(&mut self, now: u64, transition: QualityTransition) {
        self.emit(EngineEvent::ConnectionQualityChanged {
            previous: transition.previous,
            quality: transition.current,
            latency_ms: transition.latency_ms,
        });

        if transition.is_loss() {
            self.engine.set_source_connected(false, now);
            if let Some(outcome) = self.reconnect.on_connection_lost(now) {
                self.monitor.suspend();
                self.on_reconnect_outcome(now, outcome);
            }
        } else if transition.is_restore() {
            self.engine.set_source_connected(true, now);
        }
    }

    fn on_reconnect_outcome(&mut self, now: u64, outcome: ReconnectOutcome) {
        match outcome {
            ReconnectOutcome::Restored { .. } => {
                self.monitor.set_reconnect_attempts(0);
                self.monitor.resume(now);
                self.engine.set_source_connected(true, now);
            }
            ReconnectOutcome::Rescheduled { attempt, delay_ms } => {
                self.monitor.set_reconnect_attempts(attempt);
                self.emit(EngineEvent::ReconnectScheduled { attempt, delay_ms });
            }
            ReconnectOutcome::Exhausted { attempts } => {
                self.monitor.set_reconnect_attempts(attempts);
                self.monitor.stop();
                self.emit(EngineEvent::ReconnectExhausted { attempts });
            }
        }
    }

    fn on_control(&mut self, now: u64, control: Control) {
        match control {
            Control::Stop => {
                log::info!("Stop requested");
                self.running = false;
            }
            Control::ForceReconnect => {
                self.monitor.suspend();
                self.engine.set_source_connected(false, now);
                self.reconnect.force_reconnect(now);
            }
            Control::ResetAttempts => {
                self.reconnect.reset_attempts();
                self.monitor.set_reconnect_attempts(0);
            }
            Control::ForceCheck => {
                if self.can_check() {
                    self.monitor.force_check(now);
                }
            }
            Control::BackOnline => {
                if self.can_check() {
                    self.monitor.back_online(now);
                }
            }
            Control::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Manual checks only make sense while no recovery is running
    fn can_check(&self) -> bool {
        if self.probes.is_none() {
            log::info!("No prober attached, nothing to check");
            return false;
        }
        if self.reconnect.phase() != ReconnectPhase::Connected {
            log::info!(
                "Reconnect is {:?}; use force-reconnect to restart recovery",
                self.reconnect.phase()
            );
            return false;
        }
        true
    }

    fn request_probe(&mut self, origin: ProbeOrigin, ticket: ProbeTicket) {
        match &self.probes {
            Some(probes) => probes.request(origin, ticket, self.probe_timeout),
            None => log::debug!("No prober attached, probe #{} not sent", ticket.seq),
        }
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.emit(EngineEvent::Warning { message });
    }

    fn emit(&mut self, event: EngineEvent) {
        for sink in self.sinks.iter_mut() {
            sink.emit(&event);
        }
    }
}
