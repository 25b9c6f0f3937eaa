// Synthetic frame source
// A noisy grey scene with an optional moving block. Drives `porchlight
// simulate` and any test that needs frames without a camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, RawFrame};
use crate::error::{PorchlightError, Result};

const BACKGROUND_LEVEL: u8 = 96;
const BLOCK_LEVEL: u8 = 240;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    rng: StdRng,
    noise: u8,
    motion: Arc<AtomicBool>,
    block_fraction: f64,
    frame_index: u64,
    online: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_seed(width, height, 0x5eed)
    }

    pub fn with_seed(width: u32, height: u32, seed: u64) -> Self {
        Self {
            width,
            height,
            rng: StdRng::seed_from_u64(seed),
            noise: 4,
            motion: Arc::new(AtomicBool::new(false)),
            block_fraction: 0.25,
            frame_index: 0,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Per-pixel noise amplitude (0 = perfectly still scene)
    pub fn set_noise(&mut self, amplitude: u8) {
        self.noise = amplitude;
    }

    /// While enabled a bright block jumps between the frame edges
    pub fn set_motion(&mut self, on: bool) {
        self.motion.store(on, Ordering::Relaxed);
    }

    /// Shared motion toggle, for driving the scene after the source is handed off
    pub fn motion_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.motion)
    }

    /// Block side as a fraction of the frame, at most one half
    pub fn set_block_fraction(&mut self, fraction: f64) {
        self.block_fraction = fraction.clamp(0.01, 0.5);
    }

    /// Simulate the camera dropping off the network
    pub fn set_online(&mut self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    fn render(&mut self) -> RawFrame {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut data = Vec::with_capacity(w * h * 3);

        for _ in 0..w * h {
            let jitter = if self.noise > 0 {
                self.rng.gen_range(0..=self.noise)
            } else {
                0
            };
            let v = BACKGROUND_LEVEL.saturating_add(jitter);
            data.extend_from_slice(&[v, v, v]);
        }

        if self.motion.load(Ordering::Relaxed) {
            let side_w = ((w as f64) * self.block_fraction).max(1.0) as usize;
            let side_h = ((h as f64) * self.block_fraction).max(1.0) as usize;
            // Alternate between the left and right edges; with side <= half the
            // width the two positions never overlap
            let x0 = if self.frame_index % 2 == 0 { 0 } else { w - side_w };
            let y0 = h.saturating_sub(side_h) / 2;
            for y in y0..(y0 + side_h).min(h) {
                for x in x0..(x0 + side_w).min(w) {
                    let i = (y * w + x) * 3;
                    data[i..i + 3].copy_from_slice(&[BLOCK_LEVEL, BLOCK_LEVEL, BLOCK_LEVEL]);
                }
            }
        }

        self.frame_index += 1;
        RawFrame::new(self.width, self.height, data)
    }
}

impl FrameSource for SyntheticSource {
    fn current_frame(&mut self) -> Option<RawFrame> {
        if !self.is_ready() {
            return None;
        }
        Some(self.render())
    }

    fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0 && self.online.load(Ordering::Relaxed)
    }

    fn reconnect(&mut self) -> Result<()> {
        if self.online.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(PorchlightError::Source("synthetic camera is offline".to_string()))
        }
    }

    fn liveness(&self) -> Option<Arc<AtomicBool>> {
        Some(Arc::clone(&self.online))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}
