// Porchlight Constants
// Defaults for every configurable knob live here; config.rs only references them.

// Paths
pub const APP_DIR_NAME: &str = "porchlight";
pub const CONFIG_FILENAME: &str = "config.json";
pub const DB_FILENAME: &str = "porchlight.db";

// ----- Detection -----

pub const DEFAULT_SENSITIVITY: u8 = 50;
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 5.0;
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_MIN_MOTION_DURATION_MS: u64 = 1000;
pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 500;
pub const DEFAULT_FRAME_SCALE: f64 = 0.25;
pub const DEFAULT_SKIP_PIXELS: u32 = 4;

// Per-pixel luminance delta floor (0-255)
pub const NOISE_FLOOR_REDUCED: f64 = 25.0;
pub const NOISE_FLOOR_RAW: f64 = 10.0;

// Active motion closes after this long without a qualifying sample
pub const MOTION_SILENCE_TIMEOUT_MS: u64 = 3000;

// RGB24
pub const BYTES_PER_PIXEL: usize = 3;

// ----- Schedule -----

pub const DEFAULT_SCHEDULE_START_HOUR: u32 = 22;
pub const DEFAULT_SCHEDULE_END_HOUR: u32 = 6;

// ----- Connection -----

pub const DEFAULT_CONNECTION_CHECK_INTERVAL_MS: u64 = 10_000;
pub const PROBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STABLE_THRESHOLD: u32 = 5;

// Latency buckets for quality classification
pub const LATENCY_EXCELLENT_MS: u64 = 100;
pub const LATENCY_GOOD_MS: u64 = 300;

// Reconnect backoff
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_RECONNECT_GRACE_MS: u64 = 1_500;

// ----- Alerts -----

// Same JPEG quality the camera service streams with
pub const DEFAULT_SNAPSHOT_QUALITY: u8 = 75;
pub const ALERT_TIMEOUT_SECS: u64 = 15;

// ----- Runtime -----

// Upper bound on a single supervisor sleep so control messages stay responsive
pub const MAX_IDLE_WAIT_MS: u64 = 1_000;
pub const RECENT_EVENTS_DEFAULT_LIMIT: i64 = 20;

// ----- Stream source -----

pub const STREAM_STALE_AFTER_MS: u64 = 5_000;
// Decode rate cap; the sampler never looks more often than this
pub const STREAM_DECODE_FPS: u32 = 10;
pub const FFMPEG_ENV_KEY: &str = "PORCHLIGHT_FFMPEG_PATH";
