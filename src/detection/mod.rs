// Motion detection pipeline
//
// sampler -> analyzer -> schedule gate -> debounce, all driven from
// DetectionEngine::poll on the supervisor thread. The engine owns the only
// copy of the previous sample.

pub mod analyzer;
pub mod debounce;
pub mod sampler;
pub mod schedule;


use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{AppConfig, DetectionConfig, RecordingConfig, ScheduleConfig};
use crate::constants::BYTES_PER_PIXEL;
use crate::error::PorchlightError;
use crate::source::FrameSource;

pub use analyzer::MotionAnalyzer;
pub use debounce::{DebounceController, DebounceParams, DebouncePhase, MotionEvent, MotionTransition};
pub use sampler::FrameSampler;
pub use schedule::ScheduleGate;

/// Percentage (0-100) of sampled pixels that changed
pub type MotionScore = f64;

/// A downscaled RGB24 capture
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Monotonic ms at capture
    pub captured_at: u64,
}

impl MotionSample {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn byte_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub ticks: u64,
    pub samples_compared: u64,
    pub skipped_not_ready: u64,
    pub analysis_errors: u64,
    pub coalesced_ticks: u64,
}

pub struct DetectionEngine {
    sampler: FrameSampler,
    analyzer: MotionAnalyzer,
    schedule: ScheduleGate,
    debounce: DebounceController,
    previous: Option<MotionSample>,
    current_score: Option<MotionScore>,
    running: bool,
    source_connected: bool,
    stats: EngineStats,
}

impl DetectionEngine {
    pub fn new(detection: &DetectionConfig, schedule: &ScheduleConfig, recording: &RecordingConfig) -> Self {
        Self {
            sampler: FrameSampler::new(detection),
            analyzer: MotionAnalyzer::new(detection),
            schedule: ScheduleGate::new(schedule.clone()),
            debounce: DebounceController::new(DebounceParams::from_config(detection, recording)),
            previous: None,
            current_score: None,
            running: false,
            source_connected: true,
            stats: EngineStats::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.detection, &config.schedule, &config.recording)
    }

    /// Begin sampling. A no-op if already running.
    pub fn start(&mut self, now: u64) {
        if self.running {
            return;
        }
        self.running = true;
        if self.source_connected {
            self.sampler.start(now);
        }
        log::info!("Motion detection started");
    }

    /// Disarm every timer and drop the baseline. Closes an open event.
    pub fn stop(&mut self, wall: DateTime<Utc>) -> Option<MotionTransition> {
        if self.running {
            log::info!("Motion detection stopped");
        }
        self.running = false;
        self.sampler.stop();
        self.previous = None;
        self.current_score = None;
        self.debounce.stop(wall)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pause sampling while the source is down; resume with a fresh baseline.
    pub fn set_source_connected(&mut self, connected: bool, now: u64) {
        if self.source_connected == connected {
            return;
        }
        self.source_connected = connected;
        if connected {
            self.previous = None;
            if self.running {
                self.sampler.start(now);
            }
        } else {
            self.sampler.stop();
        }
    }

    /// Advance timers and take a sample if one is due.
    pub fn poll(
        &mut self,
        now: u64,
        wall: DateTime<Utc>,
        hour: u32,
        source: &mut dyn FrameSource,
    ) -> Vec<MotionTransition> {
        let mut out: Vec<MotionTransition> = self.debounce.poll(now, wall).into_iter().collect();

        if !self.sampler.due(now) {
            return out;
        }
        self.stats.ticks += 1;
        self.stats.coalesced_ticks = self.sampler.coalesced_ticks();

        let Some(sample) = self.sampler.capture(source, now) else {
            self.stats.skipped_not_ready += 1;
            return out;
        };

        let Some(previous) = self.previous.take() else {
            log::debug!("Baseline sample captured ({}x{})", sample.width, sample.height);
            self.previous = Some(sample);
            return out;
        };

        let score = match self.analyzer.diff(&sample, &previous) {
            Ok(score) => {
                self.stats.samples_compared += 1;
                self.previous = Some(sample);
                Some(score)
            }
            Err(PorchlightError::DimensionMismatch { .. }) => {
                log::info!(
                    "Source resolution changed to {}x{}, re-baselining",
                    sample.width,
                    sample.height
                );
                self.stats.analysis_errors += 1;
                self.previous = Some(sample);
                None
            }
            Err(e) => {
                log::warn!("Motion analysis failed: {}", e);
                self.stats.analysis_errors += 1;
                self.previous = Some(previous);
                None
            }
        };

        if score.is_some() {
            self.current_score = score;
        }
        out.extend(self.debounce.on_sample(now, wall, score, self.schedule.allows(hour)));
        out
    }

    /// Earliest moment poll has work to do
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.sampler.next_deadline(), self.debounce.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn current_score(&self) -> Option<MotionScore> {
        self.current_score
    }

    pub fn motion_active(&self) -> bool {
        self.debounce.is_active()
    }

    pub fn phase(&self) -> DebouncePhase {
        self.debounce.phase()
    }

    pub fn current_event(&self) -> Option<&MotionEvent> {
        self.debounce.current_event()
    }

    pub fn mark_notified(&mut self, id: Uuid) -> bool {
        self.debounce.mark_notified(id)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}
