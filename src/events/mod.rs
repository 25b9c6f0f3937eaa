// Engine events
// Everything observable about a running watcher goes out as an EngineEvent
// through the registered sinks. Persistence and alerting are workers that
// react to the same transitions.

pub mod alerts;
pub mod recorder;

use std::io::Write;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::connection::Quality;

pub use alerts::{encode_snapshot, AlertDispatcher, Notifier, WebhookNotifier};
pub use recorder::EventRecorder;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    MotionDetected {
        event_id: Uuid,
        level: f64,
        started_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MotionCleared {
        event_id: Uuid,
        peak_level: f64,
        started_at: DateTime<Utc>,
        cleared_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RecordingRequested { event_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ConnectionQualityChanged {
        previous: Option<Quality>,
        quality: Quality,
        latency_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    #[serde(rename_all = "camelCase")]
    ReconnectExhausted { attempts: u32 },
    Warning { message: String },
}

pub trait EventSink {
    fn emit(&mut self, event: &EngineEvent);
}

/// Writes each event to the log at a level matching its severity
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::MotionDetected { event_id, level, .. } => {
                log::info!("[motion] detected {:.1}% ({})", level, event_id)
            }
            EngineEvent::MotionCleared { event_id, peak_level, .. } => {
                log::info!("[motion] cleared, peak {:.1}% ({})", peak_level, event_id)
            }
            EngineEvent::RecordingRequested { event_id } => {
                log::info!("[recording] requested for {}", event_id)
            }
            EngineEvent::ConnectionQualityChanged { quality, latency_ms, .. } => match latency_ms {
                Some(ms) => log::info!("[connection] {} ({} ms)", quality, ms),
                None => log::info!("[connection] {}", quality),
            },
            EngineEvent::ReconnectScheduled { attempt, delay_ms } => {
                log::info!("[connection] reconnect attempt {} in {} ms", attempt + 1, delay_ms)
            }
            EngineEvent::ReconnectExhausted { attempts } => {
                log::error!("[connection] gave up after {} attempts", attempts)
            }
            EngineEvent::Warning { message } => log::warn!("{}", message),
        }
    }
}

/// One JSON object per line, for piping into other tools
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &EngineEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            log::error!("Failed to write event: {}", e);
        }
    }
}

/// Forwards events to another thread
pub struct ChannelSink {
    tx: Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: &EngineEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}
