// Debounce state machine
// Turns a stream of per-sample scores into discrete open/close motion events.
//
//   Idle --qualifying--> Rising --held for min duration--> Active
//   Active --silence timeout--> Cooling --cooldown elapsed--> Idle
//
// Only Active owns a MotionEvent, so at most one event is ever open.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{DetectionConfig, RecordingConfig};
use crate::constants::MOTION_SILENCE_TIMEOUT_MS;
use crate::timer::Deadline;

use super::MotionScore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceParams {
    /// Score (percent) a sample must exceed to qualify
    pub threshold: f64,
    pub min_duration_ms: u64,
    pub cooldown_ms: u64,
    pub silence_ms: u64,
    pub record_on_motion: bool,
}

impl DebounceParams {
    pub fn from_config(detection: &DetectionConfig, recording: &RecordingConfig) -> Self {
        Self {
            threshold: detection.threshold,
            min_duration_ms: detection.min_motion_duration,
            cooldown_ms: detection.cooldown_ms(),
            silence_ms: MOTION_SILENCE_TIMEOUT_MS,
            record_on_motion: recording.record_on_motion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionEvent {
    pub id: Uuid,
    /// Score of the sample that opened the event
    pub level: f64,
    pub peak_level: f64,
    pub started_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub recording_triggered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionTransition {
    Detected(MotionEvent),
    Cleared(MotionEvent),
}

impl MotionTransition {
    pub fn event(&self) -> &MotionEvent {
        match self {
            MotionTransition::Detected(e) | MotionTransition::Cleared(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebouncePhase {
    Idle,
    Rising,
    Active,
    Cooling,
}

#[derive(Debug)]
enum State {
    Idle,
    Rising { since: u64, peak: f64 },
    Active { event: MotionEvent, silence: Deadline },
    Cooling { until: Deadline },
}

pub struct DebounceController {
    params: DebounceParams,
    state: State,
}

impl DebounceController {
    pub fn new(params: DebounceParams) -> Self {
        Self {
            params,
            state: State::Idle,
        }
    }

    pub fn phase(&self) -> DebouncePhase {
        match self.state {
            State::Idle => DebouncePhase::Idle,
            State::Rising { .. } => DebouncePhase::Rising,
            State::Active { .. } => DebouncePhase::Active,
            State::Cooling { .. } => DebouncePhase::Cooling,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    pub fn current_event(&self) -> Option<&MotionEvent> {
        match &self.state {
            State::Active { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match &self.state {
            State::Active { silence, .. } => silence.at(),
            State::Cooling { until } => until.at(),
            _ => None,
        }
    }

    /// Fire any expired timer. Only a silence timeout produces a transition.
    pub fn poll(&mut self, now: u64, wall: DateTime<Utc>) -> Option<MotionTransition> {
        let fired = match &mut self.state {
            State::Active { silence, .. } => silence.fire(now),
            State::Cooling { until } => until.fire(now),
            _ => false,
        };
        if !fired {
            return None;
        }

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Active { event, .. } => {
                let cleared = close_event(event, wall);
                log::info!(
                    "Motion cleared (event {}, peak {:.1}%)",
                    cleared.id,
                    cleared.peak_level
                );
                self.enter_cooling(now);
                Some(MotionTransition::Cleared(cleared))
            }
            State::Cooling { .. } => {
                log::debug!("Cooldown finished");
                None
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Feed one sample. `score` is None when the sample could not be scored.
    pub fn on_sample(
        &mut self,
        now: u64,
        wall: DateTime<Utc>,
        score: Option<MotionScore>,
        schedule_active: bool,
    ) -> Vec<MotionTransition> {
        let mut out: Vec<MotionTransition> = self.poll(now, wall).into_iter().collect();

        let qualifying = match score {
            Some(s) if schedule_active && s > self.params.threshold => Some(s),
            _ => None,
        };

        match &mut self.state {
            State::Idle => {
                if let Some(s) = qualifying {
                    if self.params.min_duration_ms == 0 {
                        out.push(self.open_event(now, wall, s, s));
                    } else {
                        log::debug!("Motion rising at {:.1}%", s);
                        self.state = State::Rising { since: now, peak: s };
                    }
                }
            }
            State::Rising { since, peak } => match qualifying {
                Some(s) => {
                    *peak = peak.max(s);
                    if now.saturating_sub(*since) >= self.params.min_duration_ms {
                        let peak = *peak;
                        out.push(self.open_event(now, wall, s, peak));
                    }
                }
                None => {
                    log::debug!("Motion fell back before minimum duration");
                    self.state = State::Idle;
                }
            },
            State::Active { event, silence } => {
                if let Some(s) = qualifying {
                    event.peak_level = event.peak_level.max(s);
                    silence.arm_in(now, self.params.silence_ms);
                }
            }
            State::Cooling { .. } => {}
        }

        out
    }

    /// Flag the open event as notified. False if it already closed or the id differs.
    pub fn mark_notified(&mut self, id: Uuid) -> bool {
        match &mut self.state {
            State::Active { event, .. } if event.id == id => {
                event.notified = true;
                true
            }
            _ => false,
        }
    }

    /// Disarm timers and return to Idle, closing any open event.
    pub fn stop(&mut self, wall: DateTime<Utc>) -> Option<MotionTransition> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Active { event, .. } => {
                let cleared = close_event(event, wall);
                log::info!("Motion event {} closed on stop", cleared.id);
                Some(MotionTransition::Cleared(cleared))
            }
            _ => None,
        }
    }

    fn open_event(&mut self, now: u64, wall: DateTime<Utc>, level: f64, peak: f64) -> MotionTransition {
        let event = MotionEvent {
            id: Uuid::new_v4(),
            level,
            peak_level: peak.max(level),
            started_at: wall,
            cleared_at: None,
            notified: false,
            recording_triggered: self.params.record_on_motion,
        };
        log::info!("Motion detected at {:.1}% (event {})", level, event.id);

        let mut silence = Deadline::new();
        silence.arm_in(now, self.params.silence_ms);
        self.state = State::Active {
            event: event.clone(),
            silence,
        };
        MotionTransition::Detected(event)
    }

    fn enter_cooling(&mut self, now: u64) {
        if self.params.cooldown_ms == 0 {
            self.state = State::Idle;
            return;
        }
        let mut until = Deadline::new();
        until.arm_in(now, self.params.cooldown_ms);
        self.state = State::Cooling { until };
    }
}

fn close_event(mut event: MotionEvent, wall: DateTime<Utc>) -> MotionEvent {
    event.cleared_at = Some(wall.max(event.started_at));
    event
}
