// Frame sources
//
// The detector never knows whether it is looking at a live stream or a
// polled snapshot: both sit behind FrameSource, picked by source.kind.

pub mod still;
pub mod stream;
pub mod synthetic;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use std::time::Duration;

use crate::config::{AppConfig, SourceKind};
use crate::constants::BYTES_PER_PIXEL;
use crate::error::Result;

pub use still::StillImageSource;
pub use stream::StreamSource;
pub use synthetic::SyntheticSource;

/// A decoded RGB24 frame at the source's native resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Solid-colour frame
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self { width, height, data }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Zero dimensions or a buffer too short to hold them
    pub fn is_empty(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.data.len() < self.pixel_count() * BYTES_PER_PIXEL
    }
}

/// Anything the detector can pull frames from.
///
/// `current_frame` is called from the supervisor thread and must not block
/// for long; sources that decode continuously do so on their own thread.
pub trait FrameSource {
    /// Latest frame, or None while the source is not ready
    fn current_frame(&mut self) -> Option<RawFrame>;

    fn is_ready(&self) -> bool;

    /// Tear down and re-acquire the underlying connection
    fn reconnect(&mut self) -> Result<()>;

    /// Flag kept current by the source itself, usable as a probe target
    fn liveness(&self) -> Option<Arc<AtomicBool>> {
        None
    }

    /// Release any background resources. Idempotent.
    fn close(&mut self) {}

    fn describe(&self) -> String;
}

/// Build the configured source. Still sources poll at the detection interval
/// and share the probe timeout for their reads.
pub fn open_source(config: &AppConfig) -> Result<Box<dyn FrameSource>> {
    let url = &config.source.url;
    let source: Box<dyn FrameSource> = match config.source.kind {
        SourceKind::Stream => Box::new(StreamSource::open(url)?),
        SourceKind::Still => Box::new(StillImageSource::new(
            url,
            Duration::from_millis(config.detection.detection_interval_ms),
            Duration::from_millis(config.connection.probe_timeout_ms),
        )),
        SourceKind::Synthetic => Box::new(SyntheticSource::new(320, 240)),
    };
    log::info!("Opened frame source: {}", source.describe());
    Ok(source)
}
