// Porchlight configuration
// Loaded from a JSON file (camelCase keys). Every section has defaults so a
// partial file, or no file at all, is valid. validate() is the only place
// values are clamped or rejected; nothing downstream re-checks them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{PorchlightError, Result};

/// Which kind of frame source feeds the detector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Continuous stream (MJPEG / RTSP) decoded by ffmpeg
    Stream,
    /// Snapshot URL or file fetched on every sample tick
    Still,
    /// Generated frames, for demos and simulation
    Synthetic,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Stream
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Stream,
            url: "http://127.0.0.1:8000/stream.mjpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// 0-100, higher means smaller luminance changes count
    pub sensitivity: u8,
    /// Percent of sampled pixels that must change
    pub threshold: f64,
    /// Seconds of quiet after an event closes
    pub cooldown_period: u64,
    /// Milliseconds of sustained motion before an event opens
    pub min_motion_duration: u64,
    pub noise_reduction: bool,
    pub detection_interval_ms: u64,
    /// Downscale factor in (0, 1]
    pub frame_scale: f64,
    /// Pixel stride when comparing samples
    pub skip_pixels: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            threshold: DEFAULT_THRESHOLD_PERCENT,
            cooldown_period: DEFAULT_COOLDOWN_SECS,
            min_motion_duration: DEFAULT_MIN_MOTION_DURATION_MS,
            noise_reduction: true,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            frame_scale: DEFAULT_FRAME_SCALE,
            skip_pixels: DEFAULT_SKIP_PIXELS,
        }
    }
}

impl DetectionConfig {
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_period.saturating_mul(1000)
    }

    fn validate(mut self) -> Result<Self> {
        self.sensitivity = self.sensitivity.min(100);
        self.skip_pixels = self.skip_pixels.max(1);

        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(invalid(format!(
                "threshold must be within 0-100 percent, got {}",
                self.threshold
            )));
        }
        if !(self.frame_scale > 0.0 && self.frame_scale <= 1.0) {
            return Err(invalid(format!(
                "frameScale must be within (0, 1], got {}",
                self.frame_scale
            )));
        }
        if self.detection_interval_ms == 0 {
            return Err(invalid("detectionIntervalMs must be positive".to_string()));
        }

        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub schedule_enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule_enabled: false,
            start_hour: DEFAULT_SCHEDULE_START_HOUR,
            end_hour: DEFAULT_SCHEDULE_END_HOUR,
        }
    }
}

impl ScheduleConfig {
    fn validate(self) -> Result<Self> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(invalid(format!(
                "schedule hours must be within 0-23, got {}-{}",
                self.start_hour, self.end_hour
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Health URL to probe; falls back to the source's own liveness when unset
    pub probe_url: Option<String>,
    pub connection_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub reconnect_grace_ms: u64,
    /// Pause polling after this many consecutive successes (with stopOnStable)
    pub stable_threshold: u32,
    pub stop_on_stable: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            connection_check_interval_ms: DEFAULT_CONNECTION_CHECK_INTERVAL_MS,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            reconnect_grace_ms: DEFAULT_RECONNECT_GRACE_MS,
            stable_threshold: DEFAULT_STABLE_THRESHOLD,
            stop_on_stable: false,
        }
    }
}

impl ConnectionConfig {
    fn validate(mut self) -> Result<Self> {
        if self.connection_check_interval_ms == 0 {
            return Err(invalid("connectionCheckIntervalMs must be positive".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("probeTimeoutMs must be positive".to_string()));
        }
        self.probe_timeout_ms = self.probe_timeout_ms.min(PROBE_TIMEOUT_MS);
        if self.base_backoff_ms == 0 {
            return Err(invalid("baseBackoffMs must be positive".to_string()));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(invalid(format!(
                "maxBackoffMs ({}) must not be below baseBackoffMs ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(invalid("maxReconnectAttempts must be at least 1".to_string()));
        }
        if self.stable_threshold == 0 {
            return Err(invalid("stableThreshold must be at least 1".to_string()));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertConfig {
    pub email_notifications: bool,
    pub recipient: Option<String>,
    /// Endpoint that turns alerts into emails
    pub webhook_url: Option<String>,
    pub snapshot_quality: u8,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            email_notifications: false,
            recipient: None,
            webhook_url: None,
            snapshot_quality: DEFAULT_SNAPSHOT_QUALITY,
        }
    }
}

impl AlertConfig {
    /// Recipient to alert, if alerts are on and someone is configured
    pub fn active_recipient(&self) -> Option<&str> {
        if !self.email_notifications {
            return None;
        }
        self.recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    fn validate(mut self) -> Result<Self> {
        self.snapshot_quality = self.snapshot_quality.clamp(1, 100);
        if self.email_notifications {
            if self.active_recipient().is_none() {
                return Err(invalid("emailNotifications is on but no recipient is set".to_string()));
            }
            if self.webhook_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                return Err(invalid("emailNotifications is on but no webhookUrl is set".to_string()));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    pub record_on_motion: bool,
}

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub detection: DetectionConfig,
    pub schedule: ScheduleConfig,
    pub connection: ConnectionConfig,
    pub alerts: AlertConfig,
    pub recording: RecordingConfig,
    pub database_path: Option<PathBuf>,
}

impl AppConfig {
    /// Clamp soft limits and reject values the engine cannot run with.
    pub fn validate(self) -> Result<Self> {
        Ok(Self {
            source: self.source,
            detection: self.detection.validate()?,
            schedule: self.schedule.validate()?,
            connection: self.connection.validate()?,
            alerts: self.alerts.validate()?,
            recording: self.recording,
            database_path: self.database_path,
        })
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(p) => Ok(p.clone()),
            None => crate::db::default_db_path(),
        }
    }
}

fn invalid(msg: String) -> PorchlightError {
    PorchlightError::InvalidConfig(msg)
}

/// Default config location: <config dir>/porchlight/config.json
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_DIR_NAME)
        .ok_or_else(|| PorchlightError::Other("Could not determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILENAME))
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return AppConfig::default().validate();
    }

    let text = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&text)?;
    config.validate()
}

/// Write a config file, creating parent directories.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default().validate().unwrap();
        assert_eq!(config.detection.sensitivity, DEFAULT_SENSITIVITY);
        assert_eq!(config.connection.base_backoff_ms, 2_000);
        assert_eq!(config.connection.max_backoff_ms, 60_000);
        assert_eq!(config.source.kind, SourceKind::Stream);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "detection": { "sensitivity": 80, "skipPixels": 2 },
            "schedule": { "scheduleEnabled": true, "startHour": 20, "endHour": 7 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        let config = config.validate().unwrap();

        assert_eq!(config.detection.sensitivity, 80);
        assert_eq!(config.detection.skip_pixels, 2);
        assert_eq!(config.detection.threshold, DEFAULT_THRESHOLD_PERCENT);
        assert!(config.schedule.schedule_enabled);
        assert_eq!(config.schedule.start_hour, 20);
        assert_eq!(config.connection.connection_check_interval_ms, DEFAULT_CONNECTION_CHECK_INTERVAL_MS);
    }

    #[test]
    fn test_clamps_soft_limits() {
        let mut config = AppConfig::default();
        config.detection.sensitivity = 250;
        config.detection.skip_pixels = 0;
        config.alerts.snapshot_quality = 0;
        config.connection.probe_timeout_ms = 30_000;

        let config = config.validate().unwrap();
        assert_eq!(config.detection.sensitivity, 100);
        assert_eq!(config.detection.skip_pixels, 1);
        assert_eq!(config.alerts.snapshot_quality, 1);
        assert_eq!(config.connection.probe_timeout_ms, PROBE_TIMEOUT_MS);
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.detection.threshold = 120.0;
        assert!(matches!(config.validate(), Err(PorchlightError::InvalidConfig(_))));

        let mut config = AppConfig::default();
        config.detection.threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_scale_and_intervals() {
        let mut config = AppConfig::default();
        config.detection.frame_scale = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.frame_scale = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.detection_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.connection_check_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.connection.base_backoff_ms = 10_000;
        config.connection.max_backoff_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_hours() {
        let mut config = AppConfig::default();
        config.schedule.end_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alerts_need_recipient_and_webhook() {
        let mut config = AppConfig::default();
        config.alerts.email_notifications = true;
        config.alerts.recipient = Some("  ".to_string());
        config.alerts.webhook_url = Some("http://localhost/alert".to_string());
        assert!(config.clone().validate().is_err());

        config.alerts.recipient = Some("me@example.com".to_string());
        let ok = config.clone().validate().unwrap();
        assert_eq!(ok.alerts.active_recipient(), Some("me@example.com"));

        config.alerts.webhook_url = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_active_recipient_requires_flag() {
        let alerts = AlertConfig {
            email_notifications: false,
            recipient: Some("me@example.com".to_string()),
            ..AlertConfig::default()
        };
        assert_eq!(alerts.active_recipient(), None);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config.detection, DetectionConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.detection.threshold = 12.5;
        config.source.kind = SourceKind::Still;
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.detection.threshold, 12.5);
        assert_eq!(loaded.source.kind, SourceKind::Still);
    }
}
