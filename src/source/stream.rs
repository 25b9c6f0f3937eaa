// Live stream source (MJPEG / RTSP / anything ffmpeg can open)
//
// ffmpeg decodes to RGB24 on a reader thread; the supervisor only ever
// copies the most recent frame out of a mutex, so capture never blocks on
// the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};

use super::{FrameSource, RawFrame};
use crate::constants::{STREAM_DECODE_FPS, STREAM_STALE_AFTER_MS};
use crate::error::{PorchlightError, Result};

struct LatestFrame {
    frame: RawFrame,
    received: Instant,
}

pub struct StreamSource {
    url: String,
    latest: Arc<Mutex<Option<LatestFrame>>>,
    alive: Arc<AtomicBool>,
    child: Option<FfmpegChild>,
    reader: Option<JoinHandle<()>>,
}

impl StreamSource {
    /// Start decoding immediately. Frames arrive asynchronously; until the
    /// first one lands the source reports not ready.
    pub fn open(url: &str) -> Result<Self> {
        let mut source = Self {
            url: url.to_string(),
            latest: Arc::new(Mutex::new(None)),
            alive: Arc::new(AtomicBool::new(false)),
            child: None,
            reader: None,
        };
        source.spawn_decoder()?;
        Ok(source)
    }

    fn spawn_decoder(&mut self) -> Result<()> {
        let filter = format!("fps={}", STREAM_DECODE_FPS);
        let mut child = FfmpegCommand::new_with_path(crate::tools::ffmpeg_path())
            .input(&self.url)
            .args(["-vf", filter.as_str()])
            .rawvideo()
            .spawn()
            .map_err(|e| PorchlightError::FFmpeg(format!("Failed to start ffmpeg: {}", e)))?;

        let events = child
            .iter()
            .map_err(|e| PorchlightError::FFmpeg(format!("Failed to read ffmpeg output: {}", e)))?;

        let latest = Arc::clone(&self.latest);
        let alive = Arc::clone(&self.alive);
        let url = self.url.clone();

        let reader = std::thread::Builder::new()
            .name("stream-reader".into())
            .spawn(move || {
                for event in events {
                    match event {
                        FfmpegEvent::OutputFrame(frame) => {
                            let raw = RawFrame::new(frame.width, frame.height, frame.data);
                            if let Ok(mut guard) = latest.lock() {
                                *guard = Some(LatestFrame { frame: raw, received: Instant::now() });
                            }
                            alive.store(true, Ordering::Relaxed);
                        }
                        FfmpegEvent::Log(LogLevel::Error, msg) | FfmpegEvent::Log(LogLevel::Fatal, msg) => {
                            log::warn!("ffmpeg [{}]: {}", url, msg);
                        }
                        FfmpegEvent::Error(msg) => {
                            log::warn!("ffmpeg [{}]: {}", url, msg);
                        }
                        FfmpegEvent::Done => break,
                        _ => {}
                    }
                }
                alive.store(false, Ordering::Relaxed);
                log::info!("Stream reader for {} exited", url);
            })
            .map_err(|e| PorchlightError::Source(format!("Failed to spawn stream reader: {}", e)))?;

        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn stop_decoder(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                log::debug!("ffmpeg kill for {} failed: {}", self.url, e);
            }
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("Stream reader for {} panicked", self.url);
            }
        }
        self.alive.store(false, Ordering::Relaxed);
        if let Ok(mut guard) = self.latest.lock() {
            *guard = None;
        }
    }

    fn is_stale(received: Instant) -> bool {
        received.elapsed() > Duration::from_millis(STREAM_STALE_AFTER_MS)
    }
}

impl FrameSource for StreamSource {
    fn current_frame(&mut self) -> Option<RawFrame> {
        let guard = self.latest.lock().ok()?;
        let latest = guard.as_ref()?;
        if Self::is_stale(latest.received) {
            self.alive.store(false, Ordering::Relaxed);
            return None;
        }
        if latest.frame.is_empty() {
            return None;
        }
        Some(latest.frame.clone())
    }

    fn is_ready(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
            && self
                .latest
                .lock()
                .ok()
                .map_or(false, |g| g.as_ref().map_or(false, |l| !Self::is_stale(l.received)))
    }

    fn reconnect(&mut self) -> Result<()> {
        log::info!("Restarting stream decoder for {}", self.url);
        self.stop_decoder();
        self.spawn_decoder()
    }

    fn liveness(&self) -> Option<Arc<AtomicBool>> {
        Some(Arc::clone(&self.alive))
    }

    fn close(&mut self) {
        self.stop_decoder();
    }

    fn describe(&self) -> String {
        format!("stream {}", self.url)
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}
