//! Engine configuration
//!
//! Loaded from environment variables with built-in defaults.

use std::str::FromStr;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target capture frame rate (frames per second)
    pub frame_rate: u32,
    /// Target capture resolution, e.g. "1920x1080"
    pub resolution: String,
    /// Per-source frame buffer capacity
    pub buffer_size: usize,
    /// Delay between detection cycles
    pub processing_interval: Duration,
    /// Anomaly score threshold (0.0 - 1.0)
    pub anomaly_threshold: f32,
    /// Optional remote inference endpoint (object/face detection offload)
    pub inference_url: Option<String>,
    /// Sources to register at startup: (source_id, stream URI) pairs
    pub sources: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_rate: env_parse("ARGOS_FRAME_RATE", 30),
            resolution: std::env::var("ARGOS_RESOLUTION")
                .unwrap_or_else(|_| "1920x1080".to_string()),
            buffer_size: env_parse("ARGOS_BUFFER_SIZE", 10),
            processing_interval: Duration::from_millis(env_parse(
                "ARGOS_PROCESSING_INTERVAL_MS",
                100,
            )),
            anomaly_threshold: env_parse("ARGOS_ANOMALY_THRESHOLD", 0.5),
            inference_url: std::env::var("ARGOS_INFERENCE_URL").ok(),
            sources: parse_sources(&std::env::var("ARGOS_SOURCES").unwrap_or_default()),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a "WIDTHxHEIGHT" resolution string, falling back to 1920x1080
pub fn parse_resolution(resolution: &str) -> (u32, u32) {
    let mut parts = resolution.split('x');
    let width = parts.next().and_then(|p| p.trim().parse().ok());
    let height = parts.next().and_then(|p| p.trim().parse().ok());
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => (1920, 1080),
    }
}

/// Parse "id=uri,id=uri" source list; empty input yields two demo sources
fn parse_sources(raw: &str) -> Vec<(String, String)> {
    let parsed: Vec<(String, String)> = raw
        .split(',')
        .filter_map(|entry| {
            let (id, uri) = entry.split_once('=')?;
            let id = id.trim();
            let uri = uri.trim();
            if id.is_empty() || uri.is_empty() {
                return None;
            }
            Some((id.to_string(), uri.to_string()))
        })
        .collect();

    if parsed.is_empty() {
        vec![
            ("cam-001".to_string(), "synthetic://cam-001".to_string()),
            ("cam-002".to_string(), "synthetic://cam-002".to_string()),
        ]
    } else {
        parsed
    }
}
