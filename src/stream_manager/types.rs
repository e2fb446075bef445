//! Stream manager data types

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connector::StreamDescriptor;

/// Per-source configuration, fixed at add time apart from the enabled flag
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Unique, caller-assigned source identifier
    pub source_id: String,
    /// Connection descriptor
    pub descriptor: StreamDescriptor,
    /// Target capture frame rate (frames per second)
    pub frame_rate: u32,
    /// Target resolution, e.g. "1920x1080"
    pub resolution: String,
    pub enabled: bool,
}

impl SourceConfig {
    pub fn new(source_id: impl Into<String>, descriptor: StreamDescriptor) -> Self {
        Self {
            source_id: source_id.into(),
            descriptor,
            frame_rate: 30,
            resolution: "1920x1080".to_string(),
            enabled: true,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }
}

/// Source running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Stopped,
    Connecting,
    Streaming,
    Reconnecting,
}

/// Mutable per-source runtime state. Written only by the source's own
/// capture loop (and by start/stop on its behalf).
#[derive(Debug, Clone)]
pub struct SourceRuntime {
    pub state: SourceState,
    pub frame_count: u64,
    pub error_count: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SourceRuntime {
    fn default() -> Self {
        Self {
            state: SourceState::Stopped,
            frame_count: 0,
            error_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }
}

/// Point-in-time source status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub state: SourceState,
    pub enabled: bool,
    pub frame_count: u64,
    pub error_count: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub buffered_frames: usize,
    pub uri: String,
    pub resolution: String,
}

/// Aggregate stream statistics
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub total_sources: usize,
    pub streaming_sources: usize,
    pub total_frames_captured: u64,
}

/// JPEG-encoded snapshot of a source's latest frame
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source_id: String,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}
