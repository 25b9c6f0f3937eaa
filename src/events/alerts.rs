// Motion alerts
// On a detected event, a snapshot of the full frame is JPEG-encoded and sent
// through a Notifier on the dispatcher thread. One attempt per event, no retry.

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::constants::ALERT_TIMEOUT_SECS;
use crate::detection::MotionEvent;
use crate::error::{PorchlightError, Result};
use crate::runtime::Message;
use crate::source::RawFrame;

pub trait Notifier: Send {
    fn send_alert(
        &mut self,
        recipient: &str,
        image: Option<&[u8]>,
        level: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// Posts alerts as multipart forms to a webhook that relays them by email
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(ALERT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PorchlightError::Notify(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send_alert(
        &mut self,
        recipient: &str,
        image: Option<&[u8]>,
        level: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut form = reqwest::blocking::multipart::Form::new()
            .text("recipient", recipient.to_string())
            .text("level", format!("{:.1}", level))
            .text("timestamp", timestamp.to_rfc3339());

        if let Some(bytes) = image {
            let part = reqwest::blocking::multipart::Part::bytes(bytes.to_vec())
                .file_name(format!("motion-{}.jpg", timestamp.format("%Y%m%d-%H%M%S")))
                .mime_str("image/jpeg")
                .map_err(|e| PorchlightError::Notify(e.to_string()))?;
            form = form.part("snapshot", part);
        }

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(|e| PorchlightError::Notify(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PorchlightError::Notify(format!(
                "webhook answered HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// JPEG-encode an RGB24 frame
pub fn encode_snapshot(frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
    if frame.is_empty() {
        return Err(PorchlightError::MalformedSample(format!(
            "cannot encode {}x{} frame with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }
    let len = frame.pixel_count() * crate::constants::BYTES_PER_PIXEL;
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode(&frame.data[..len], frame.width, frame.height, ColorType::Rgb8)?;
    }
    Ok(out)
}

struct AlertJob {
    event_id: Uuid,
    recipient: String,
    frame: Option<RawFrame>,
    level: f64,
    timestamp: DateTime<Utc>,
}

pub struct AlertDispatcher {
    recipient: Option<String>,
    tx: Option<Sender<AlertJob>>,
    handle: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    /// Start the dispatcher thread. Alerts stay off unless a recipient is active.
    pub fn spawn(config: &AlertConfig, mut notifier: Box<dyn Notifier>, inbox: Sender<Message>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<AlertJob>();
        let quality = config.snapshot_quality;

        let handle = std::thread::Builder::new()
            .name("alert-dispatcher".into())
            .spawn(move || {
                for job in rx {
                    let snapshot = job.frame.as_ref().and_then(|frame| match encode_snapshot(frame, quality) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            log::warn!("Snapshot encoding failed, alerting without image: {}", e);
                            None
                        }
                    });

                    let result = notifier.send_alert(&job.recipient, snapshot.as_deref(), job.level, job.timestamp);
                    match &result {
                        Ok(()) => log::info!("Alert sent to {} for event {}", job.recipient, job.event_id),
                        Err(e) => log::warn!("Alert for event {} failed: {}", job.event_id, e),
                    }
                    let _ = inbox.send(Message::AlertDone {
                        event_id: job.event_id,
                        error: result.err().map(|e| e.to_string()),
                    });
                }
                log::debug!("Alert dispatcher stopped");
            })
            .map_err(|e| PorchlightError::Other(format!("Failed to spawn alert dispatcher: {}", e)))?;

        Ok(Self {
            recipient: config.active_recipient().map(str::to_string),
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.recipient.is_some() && self.tx.is_some()
    }

    /// Queue an alert for a freshly detected event. Returns false when alerts are off.
    pub fn dispatch(&self, event: &MotionEvent, frame: Option<RawFrame>) -> bool {
        let (Some(recipient), Some(tx)) = (&self.recipient, &self.tx) else {
            return false;
        };
        let job = AlertJob {
            event_id: event.id,
            recipient: recipient.clone(),
            frame,
            level: event.level,
            timestamp: event.started_at,
        };
        if tx.send(job).is_err() {
            log::warn!("Alert dispatcher is gone, dropping alert for {}", event.id);
            return false;
        }
        true
    }

    /// Finish queued alerts and stop the worker. Idempotent.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Alert dispatcher thread panicked");
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
