// Connection health
// Periodic probing with quality classification, plus exponential-backoff
// reconnection once the source is lost.

pub mod monitor;
pub mod probe;
pub mod reconnect;

use serde::Serialize;

use crate::constants::{LATENCY_EXCELLENT_MS, LATENCY_GOOD_MS};

pub use monitor::{ConnectionMonitor, MonitorParams, MonitorPoll, QualityTransition};
pub use probe::{HttpProber, OnlineFlagProber, Prober};
pub use reconnect::{
    backoff_delay, ReconnectAction, ReconnectManager, ReconnectOutcome, ReconnectParams, ReconnectPhase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Poor,
    Disconnected,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Poor => "poor",
            Quality::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        *self != Quality::Disconnected
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket a successful probe's round-trip time
pub fn classify(latency_ms: u64) -> Quality {
    if latency_ms < LATENCY_EXCELLENT_MS {
        Quality::Excellent
    } else if latency_ms < LATENCY_GOOD_MS {
        Quality::Good
    } else {
        Quality::Poor
    }
}

/// Result of one health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: Option<u64>,
}

impl ProbeOutcome {
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            latency_ms: None,
        }
    }

    pub fn quality(&self) -> Quality {
        match (self.success, self.latency_ms) {
            (true, Some(ms)) => classify(ms),
            (true, None) => Quality::Good,
            (false, _) => Quality::Disconnected,
        }
    }
}

/// Identifies one issued probe so late or stray results can be discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTicket {
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub quality: Quality,
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            quality: Quality::Disconnected,
            latency_ms: None,
            consecutive_failures: 0,
            reconnect_attempts: 0,
        }
    }
}
