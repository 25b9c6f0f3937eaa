// Motion analyzer
// Luminance-difference change detection over strided pixels.
//
// A pixel counts as changed when its luminance moved by more than
// max(noise floor, 255 - sensitivity * 2.55). The score is the changed share
// of the pixels actually compared, so it means the same thing at any stride.

use crate::config::DetectionConfig;
use crate::constants::{BYTES_PER_PIXEL, NOISE_FLOOR_RAW, NOISE_FLOOR_REDUCED};
use crate::error::{PorchlightError, Result};

use super::{MotionSample, MotionScore};

#[derive(Debug, Clone)]
pub struct MotionAnalyzer {
    sensitivity: u8,
    noise_reduction: bool,
    stride: usize,
}

impl MotionAnalyzer {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            sensitivity: config.sensitivity.min(100),
            noise_reduction: config.noise_reduction,
            stride: config.skip_pixels.max(1) as usize,
        }
    }

    /// Minimum luminance delta for a pixel to count as changed
    pub fn pixel_threshold(&self) -> f64 {
        let floor = if self.noise_reduction {
            NOISE_FLOOR_REDUCED
        } else {
            NOISE_FLOOR_RAW
        };
        floor.max(255.0 - self.sensitivity as f64 * 2.55)
    }

    /// Percentage (0-100) of sampled pixels that changed between two samples
    pub fn diff(&self, current: &MotionSample, previous: &MotionSample) -> Result<MotionScore> {
        if current.width != previous.width || current.height != previous.height {
            return Err(PorchlightError::DimensionMismatch {
                previous_width: previous.width,
                previous_height: previous.height,
                width: current.width,
                height: current.height,
            });
        }

        let pixel_count = current.pixel_count();
        let needed = current.byte_len();
        for (name, sample) in [("current", current), ("previous", previous)] {
            if sample.pixels.len() < needed {
                return Err(PorchlightError::MalformedSample(format!(
                    "{} sample holds {} bytes, {}x{} needs {}",
                    name,
                    sample.pixels.len(),
                    sample.width,
                    sample.height,
                    needed
                )));
            }
        }

        if pixel_count == 0 {
            return Ok(0.0);
        }

        let threshold = self.pixel_threshold();
        let mut sampled = 0usize;
        let mut changed = 0usize;

        for p in (0..pixel_count).step_by(self.stride) {
            let i = p * BYTES_PER_PIXEL;
            let a = luminance(&current.pixels[i..i + BYTES_PER_PIXEL]);
            let b = luminance(&previous.pixels[i..i + BYTES_PER_PIXEL]);
            if (a - b).abs() > threshold {
                changed += 1;
            }
            sampled += 1;
        }

        Ok(changed as f64 / sampled as f64 * 100.0)
    }
}

/// Mean of the three colour channels
pub fn luminance(rgb: &[u8]) -> f64 {
    (rgb[0] as f64 + rgb[1] as f64 + rgb[2] as f64) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(width: u32, height: u32, rgb: [u8; 3]) -> MotionSample {
        let mut pixels = Vec::new();
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgb);
        }
        MotionSample { width, height, pixels, captured_at: 0 }
    }

    /// Same frame with the first `n` pixels replaced
    fn with_changed_prefix(base: &MotionSample, n: usize, rgb: [u8; 3]) -> MotionSample {
        let mut out = base.clone();
        for p in 0..n {
            out.pixels[p * 3..p * 3 + 3].copy_from_slice(&rgb);
        }
        out
    }

    /// Horizontal luminance ramp so different sensitivities cut at different pixels
    fn gradient_pair() -> (MotionSample, MotionSample) {
        let width = 256u32;
        let previous = sample(width, 1, [0, 0, 0]);
        let mut current = previous.clone();
        for x in 0..width as usize {
            let v = x as u8;
            current.pixels[x * 3..x * 3 + 3].copy_from_slice(&[v, v, v]);
        }
        (current, previous)
    }

    fn analyzer(sensitivity: u8, noise_reduction: bool, stride: u32) -> MotionAnalyzer {
        MotionAnalyzer::new(&DetectionConfig {
            sensitivity,
            noise_reduction,
            skip_pixels: stride,
            ..DetectionConfig::default()
        })
    }

    #[test]
    fn test_identical_samples_score_zero() {
        let a = sample(40, 30, [120, 80, 200]);
        for sensitivity in [0, 50, 100] {
            let score = analyzer(sensitivity, false, 1).diff(&a, &a.clone()).unwrap();
            assert_eq!(score, 0.0);
        }
    }

    #[test]
    fn test_full_change_scores_hundred() {
        let black = sample(10, 10, [0, 0, 0]);
        let white = sample(10, 10, [255, 255, 255]);
        let score = analyzer(100, true, 1).diff(&white, &black).unwrap();
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_pixel_threshold_formula() {
        assert_eq!(analyzer(0, true, 1).pixel_threshold(), 255.0);
        assert!((analyzer(50, true, 1).pixel_threshold() - 127.5).abs() < 1e-9);
        assert_eq!(analyzer(100, true, 1).pixel_threshold(), NOISE_FLOOR_REDUCED);
        assert_eq!(analyzer(100, false, 1).pixel_threshold(), NOISE_FLOOR_RAW);
    }

    #[test]
    fn test_noise_floor_suppresses_small_changes() {
        let base = sample(10, 10, [100, 100, 100]);
        let flicker = sample(10, 10, [115, 115, 115]);

        let reduced = analyzer(100, true, 1).diff(&flicker, &base).unwrap();
        let raw = analyzer(100, false, 1).diff(&flicker, &base).unwrap();
        assert_eq!(reduced, 0.0);
        assert_eq!(raw, 100.0);
    }

    #[test]
    fn test_score_monotonic_in_sensitivity() {
        let (current, previous) = gradient_pair();
        let mut last = -1.0;
        for sensitivity in 0..=100u8 {
            let score = analyzer(sensitivity, true, 1).diff(&current, &previous).unwrap();
            assert!(
                score >= last,
                "score dropped from {} to {} at sensitivity {}",
                last,
                score,
                sensitivity
            );
            last = score;
        }
        assert!(last > 0.0);
    }

    #[test]
    fn test_normalises_by_sampled_pixels() {
        // Every pixel changed: the score must be 100 at any stride
        let black = sample(17, 13, [0, 0, 0]);
        let white = sample(17, 13, [255, 255, 255]);
        for stride in [1, 2, 3, 7, 50, 1000] {
            let score = analyzer(100, true, stride).diff(&white, &black).unwrap();
            assert_eq!(score, 100.0, "stride {}", stride);
        }
    }

    #[test]
    fn test_stride_only_inspects_sampled_pixels() {
        // 10 pixels, stride 2 inspects 0,2,4,6,8; change pixels 0..4 -> 0 and 2 hit
        let base = sample(10, 1, [0, 0, 0]);
        let changed = with_changed_prefix(&base, 4, [255, 255, 255]);
        let score = analyzer(100, true, 2).diff(&changed, &base).unwrap();
        assert!((score - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let a = sample(10, 10, [0, 0, 0]);
        let b = sample(20, 10, [0, 0, 0]);
        let err = analyzer(50, true, 1).diff(&a, &b).unwrap_err();
        assert!(matches!(err, PorchlightError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_truncated_buffer_is_error() {
        let a = sample(10, 10, [0, 0, 0]);
        let mut b = a.clone();
        b.pixels.truncate(10);
        let err = analyzer(50, true, 1).diff(&a, &b).unwrap_err();
        assert!(matches!(err, PorchlightError::MalformedSample(_)));
    }
}
