// Health probes
// Probers block, so they only ever run on a probe worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PorchlightError, Result};

use super::ProbeOutcome;

pub trait Prober: Send {
    /// Check the source once, giving up after `timeout`
    fn probe(&mut self, timeout: Duration) -> ProbeOutcome;

    fn describe(&self) -> String;
}

/// GETs a health URL. A 2xx answer is healthy unless its JSON body says otherwise.
pub struct HttpProber {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpProber {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| PorchlightError::Probe(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    fn check(&self, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .timeout(timeout)
            .send()
            .map_err(|e| PorchlightError::Probe(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PorchlightError::Probe(format!("HTTP {}", status)));
        }

        let body = response.text().unwrap_or_default();
        health_body_ok(&body)
    }
}

impl Prober for HttpProber {
    fn probe(&mut self, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        match self.check(timeout) {
            Ok(()) => ProbeOutcome::ok(started.elapsed().as_millis() as u64),
            Err(e) => {
                log::debug!("Health probe {} failed: {}", self.url, e);
                ProbeOutcome::failed()
            }
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

/// Interpret a health response body.
///
/// `{"status": "ok", "camera": "connected"}` style bodies are checked field by
/// field; absent fields and non-JSON bodies pass.
pub fn health_body_ok(body: &str) -> Result<()> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(());
    };

    if let Some(status) = value.get("status").and_then(|v| v.as_str()) {
        if status != "ok" {
            return Err(PorchlightError::Probe(format!("health status is {}", status)));
        }
    }
    if let Some(camera) = value.get("camera").and_then(|v| v.as_str()) {
        if camera == "disconnected" {
            return Err(PorchlightError::Probe("camera reports disconnected".to_string()));
        }
    }
    Ok(())
}

/// Reads a liveness flag kept current by a frame source
pub struct OnlineFlagProber {
    flag: Arc<AtomicBool>,
}

impl OnlineFlagProber {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl Prober for OnlineFlagProber {
    fn probe(&mut self, _timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        if self.flag.load(Ordering::Relaxed) {
            ProbeOutcome::ok(started.elapsed().as_millis() as u64)
        } else {
            ProbeOutcome::failed()
        }
    }

    fn describe(&self) -> String {
        "source liveness".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use crate::connection::Quality;

    /// Serve one canned HTTP response on a loopback port and return its health URL
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{}/health", addr)
    }

    #[test]
    fn test_health_body_variants() {
        assert!(health_body_ok("").is_ok());
        assert!(health_body_ok("OK").is_ok());
        assert!(health_body_ok(r#"{"status":"ok","camera":"connected"}"#).is_ok());
        assert!(health_body_ok(r#"{"status":"ok"}"#).is_ok());
        assert!(health_body_ok(r#"{"status":"error"}"#).is_err());
        assert!(health_body_ok(r#"{"status":"ok","camera":"disconnected"}"#).is_err());
    }

    #[test]
    fn test_flag_prober_follows_flag() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut prober = OnlineFlagProber::new(Arc::clone(&flag));
        let outcome = prober.probe(Duration::from_secs(1));
        assert!(outcome.success);
        assert_eq!(outcome.quality(), Quality::Excellent);

        flag.store(false, Ordering::Relaxed);
        assert_eq!(prober.probe(Duration::from_secs(1)), ProbeOutcome::failed());
    }

    #[test]
    fn test_unreachable_url_fails() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let mut prober = HttpProber::new("http://127.0.0.1:9/health").unwrap();
        let outcome = prober.probe(Duration::from_millis(500));
        assert!(!outcome.success);
    }

    #[test]
    fn test_healthy_server_passes() {
        let url = serve_once("200 OK", r#"{"status":"ok","camera":"connected"}"#);
        let mut prober = HttpProber::new(&url).unwrap();
        let outcome = prober.probe(Duration::from_secs(5));
        assert!(outcome.success);
        assert!(outcome.latency_ms.is_some());
    }

    #[test]
    fn test_error_status_fails() {
        let url = serve_once("503 Service Unavailable", r#"{"status":"ok"}"#);
        let mut prober = HttpProber::new(&url).unwrap();
        assert!(!prober.probe(Duration::from_secs(5)).success);
    }

    #[test]
    fn test_disconnected_camera_body_fails() {
        let url = serve_once("200 OK", r#"{"status":"ok","camera":"disconnected"}"#);
        let mut prober = HttpProber::new(&url).unwrap();
        assert_eq!(prober.probe(Duration::from_secs(5)), ProbeOutcome::failed());
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/health", listener.local_addr().unwrap());
        // Accepts but never answers
        let _holder = std::thread::spawn(move || {
            let conn = listener.accept();
            std::thread::sleep(Duration::from_secs(3));
            drop(conn);
        });

        let mut prober = HttpProber::new(&url).unwrap();
        let started = Instant::now();
        assert!(!prober.probe(Duration::from_millis(300)).success);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
