// Frame sampler
// Captures a downscaled copy of the source's current frame on a fixed interval.

use crate::config::DetectionConfig;
use crate::constants::BYTES_PER_PIXEL;
use crate::source::{FrameSource, RawFrame};
use crate::timer::Interval;

use super::MotionSample;

pub struct FrameSampler {
    interval: Interval,
    scale: f64,
}

impl FrameSampler {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            interval: Interval::new(config.detection_interval_ms),
            scale: config.frame_scale,
        }
    }

    pub fn start(&mut self, now: u64) {
        self.interval.start(now);
    }

    /// Disarm the sampling interval. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.interval.stop();
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_running()
    }

    /// True once per interval; late polls coalesce missed ticks.
    pub fn due(&mut self, now: u64) -> bool {
        self.interval.poll(now)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.interval.next_deadline()
    }

    pub fn coalesced_ticks(&self) -> u64 {
        self.interval.missed()
    }

    /// Grab and downscale the current frame. None when the source is not ready
    /// or has nothing usable.
    pub fn capture(&self, source: &mut dyn FrameSource, captured_at: u64) -> Option<MotionSample> {
        if !source.is_ready() {
            return None;
        }
        let frame = source.current_frame()?;
        if frame.is_empty() {
            return None;
        }
        Some(downsample(&frame, self.scale, captured_at))
    }
}

/// Nearest-neighbour downscale to floor(dim * scale), never below 1x1.
pub fn downsample(frame: &RawFrame, scale: f64, captured_at: u64) -> MotionSample {
    let target_w = ((frame.width as f64 * scale).floor() as u32).clamp(1, frame.width);
    let target_h = ((frame.height as f64 * scale).floor() as u32).clamp(1, frame.height);

    if target_w == frame.width && target_h == frame.height {
        return MotionSample {
            width: frame.width,
            height: frame.height,
            pixels: frame.data[..frame.pixel_count() * BYTES_PER_PIXEL].to_vec(),
            captured_at,
        };
    }

    let src_w = frame.width as usize;
    let mut pixels = Vec::with_capacity(target_w as usize * target_h as usize * BYTES_PER_PIXEL);
    for ty in 0..target_h as u64 {
        let sy = (ty * frame.height as u64 / target_h as u64) as usize;
        for tx in 0..target_w as u64 {
            let sx = (tx * frame.width as u64 / target_w as u64) as usize;
            let i = (sy * src_w + sx) * BYTES_PER_PIXEL;
            pixels.extend_from_slice(&frame.data[i..i + BYTES_PER_PIXEL]);
        }
    }

    MotionSample {
        width: target_w,
        height: target_h,
        pixels,
        captured_at,
    }
}
