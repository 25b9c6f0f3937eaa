// Polled still-image source
//
// A fetch thread pulls a snapshot every poll period on its own, so the
// liveness flag tracks the camera whether or not anyone is sampling. A
// snapshot is handed out once: comparing a frame with itself would read as
// "no motion" and break a rising edge, so an unchanged poll reports nothing
// and the tick is skipped.
//
// Fetchers are never joined. A reconnect bumps the generation and detaches
// the old thread; whatever it fetches afterwards is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffmpeg_sidecar::command::FfmpegCommand;

use super::{FrameSource, RawFrame};
use crate::error::{PorchlightError, Result};

/// Fetches one decoded snapshot from a URL
pub type FetchFn = Arc<dyn Fn(&str) -> Result<RawFrame> + Send + Sync>;

#[derive(Default)]
struct SnapshotState {
    latest: Option<RawFrame>,
    fresh: bool,
}

pub struct StillImageSource {
    url: String,
    fetch: FetchFn,
    poll_period: Duration,
    state: Arc<Mutex<SnapshotState>>,
    alive: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    stop: Option<Sender<()>>,
}

impl StillImageSource {
    /// Poll `url` through ffmpeg every `poll_period`, giving each fetch `timeout` of I/O.
    pub fn new(url: &str, poll_period: Duration, timeout: Duration) -> Self {
        let fetch: FetchFn = Arc::new(move |url: &str| fetch_snapshot(url, timeout));
        Self::with_fetcher(url, poll_period, fetch)
    }

    pub fn with_fetcher(url: &str, poll_period: Duration, fetch: FetchFn) -> Self {
        let mut source = Self {
            url: url.to_string(),
            fetch,
            poll_period,
            state: Arc::new(Mutex::new(SnapshotState::default())),
            alive: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            stop: None,
        };
        source.spawn_fetcher();
        source
    }

    fn spawn_fetcher(&mut self) {
        let (tx, rx) = mpsc::channel::<()>();
        let my_generation = self.generation.load(Ordering::SeqCst);
        let generation = Arc::clone(&self.generation);
        let state = Arc::clone(&self.state);
        let alive = Arc::clone(&self.alive);
        let fetch = Arc::clone(&self.fetch);
        let url = self.url.clone();
        let period = self.poll_period;

        let spawned = std::thread::Builder::new()
            .name("still-fetcher".into())
            .spawn(move || loop {
                let result = fetch(&url);
                {
                    let Ok(mut guard) = state.lock() else {
                        break;
                    };
                    // Checked under the lock so a reconnect can't interleave
                    if generation.load(Ordering::SeqCst) != my_generation {
                        break;
                    }
                    match result {
                        Ok(frame) => {
                            guard.latest = Some(frame);
                            guard.fresh = true;
                            alive.store(true, Ordering::Relaxed);
                        }
                        Err(e) => {
                            log::debug!("Snapshot fetch from {} failed: {}", url, e);
                            alive.store(false, Ordering::Relaxed);
                        }
                    }
                }
                match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            });

        match spawned {
            Ok(_) => self.stop = Some(tx),
            Err(e) => log::error!("Failed to spawn snapshot fetcher: {}", e),
        }
    }

    /// Retire the current fetcher without waiting for it
    fn stop_fetcher(&mut self) {
        if let Ok(mut guard) = self.state.lock() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *guard = SnapshotState::default();
        }
        self.stop = None;
        self.alive.store(false, Ordering::Relaxed);
    }
}

/// Decode one frame from a snapshot URL or image file.
/// Network reads give up after `timeout`.
pub fn fetch_snapshot(url: &str, timeout: Duration) -> Result<RawFrame> {
    let mut command = FfmpegCommand::new_with_path(crate::tools::ffmpeg_path());
    if url.contains("://") {
        // Microseconds; applies per read, so a stalled camera can't hang the fetcher
        let rw_timeout = (timeout.as_micros().max(1)).to_string();
        command.args(["-rw_timeout", rw_timeout.as_str()]);
    }
    let mut child = command
        .input(url)
        .args(["-frames:v", "1"])
        .rawvideo()
        .spawn()
        .map_err(|e| PorchlightError::FFmpeg(format!("Failed to start ffmpeg: {}", e)))?;

    let frame = child
        .iter()
        .map_err(|e| PorchlightError::FFmpeg(format!("Failed to read ffmpeg output: {}", e)))?
        .filter_frames()
        .next();
    let _ = child.wait();

    let frame = frame.ok_or_else(|| PorchlightError::Source(format!("No frame decoded from {}", url)))?;
    Ok(RawFrame::new(frame.width, frame.height, frame.data))
}

impl FrameSource for StillImageSource {
    fn current_frame(&mut self) -> Option<RawFrame> {
        let mut guard = self.state.lock().ok()?;
        if !guard.fresh {
            return None;
        }
        guard.fresh = false;
        guard.latest.clone().filter(|f| !f.is_empty())
    }

    fn is_ready(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn reconnect(&mut self) -> Result<()> {
        log::info!("Restarting snapshot fetcher for {}", self.url);
        self.stop_fetcher();
        self.spawn_fetcher();
        if self.stop.is_none() {
            return Err(PorchlightError::Source("snapshot fetcher could not be started".to_string()));
        }
        Ok(())
    }

    fn liveness(&self) -> Option<Arc<AtomicBool>> {
        Some(Arc::clone(&self.alive))
    }

    fn close(&mut self) {
        self.stop_fetcher();
    }

    fn describe(&self) -> String {
        format!("still {}", self.url)
    }
}

impl Drop for StillImageSource {
    fn drop(&mut self) {
        self.stop_fetcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const LONG_PERIOD: Duration = Duration::from_secs(30);

    fn wait_until(flag: &AtomicBool, want: bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if flag.load(Ordering::Relaxed) == want {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Serves a grey frame while `reachable` is set and counts calls
    fn camera(reachable: Arc<AtomicBool>, calls: Arc<AtomicUsize>) -> FetchFn {
        Arc::new(move |_url: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            if reachable.load(Ordering::Relaxed) {
                Ok(RawFrame::filled(8, 6, [90, 90, 90]))
            } else {
                Err(PorchlightError::Source("connection refused".to_string()))
            }
        })
    }

    #[test]
    fn test_liveness_tracks_camera_without_sampling() {
        let reachable = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let source = StillImageSource::with_fetcher("http://cam/snap.jpg", LONG_PERIOD, camera(reachable, calls));

        let alive = source.liveness().unwrap();
        assert!(wait_until(&alive, true));
        assert!(source.is_ready());
    }

    #[test]
    fn test_snapshot_handed_out_once() {
        let reachable = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source =
            StillImageSource::with_fetcher("http://cam/snap.jpg", LONG_PERIOD, camera(reachable, Arc::clone(&calls)));
        assert!(wait_until(&source.liveness().unwrap(), true));

        let frame = source.current_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        // No newer snapshot yet, so nothing to compare against
        assert!(source.current_frame().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconnect_refetches_on_its_own() {
        let reachable = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = StillImageSource::with_fetcher(
            "http://cam/snap.jpg",
            LONG_PERIOD,
            camera(Arc::clone(&reachable), Arc::clone(&calls)),
        );
        let alive = source.liveness().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!alive.load(Ordering::Relaxed));

        reachable.store(true, Ordering::Relaxed);
        source.reconnect().unwrap();
        assert!(wait_until(&alive, true));
        assert!(source.current_frame().is_some());
    }

    #[test]
    fn test_reconnect_does_not_wait_for_stalled_fetch() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let first = Arc::new(AtomicBool::new(true));
        let fetch: FetchFn = Arc::new(move |_url: &str| {
            if first.swap(false, Ordering::SeqCst) {
                // Hangs until the test lets go
                let _ = release_rx.lock().unwrap().recv();
                return Ok(RawFrame::filled(4, 4, [0, 0, 0]));
            }
            Ok(RawFrame::filled(4, 4, [200, 200, 200]))
        });
        let mut source = StillImageSource::with_fetcher("http://cam/snap.jpg", LONG_PERIOD, fetch);
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        source.reconnect().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(wait_until(&source.liveness().unwrap(), true));
        release_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // The stalled fetcher's late black frame is discarded
        let frame = source.current_frame().unwrap();
        assert_eq!(&frame.data[..3], &[200, 200, 200]);
    }
}
