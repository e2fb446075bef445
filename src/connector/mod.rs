//! Stream connector - connection opener contract
//!
//! ## Responsibilities
//!
//! - Define the `Open -> Read/Close` contract the capture loop consumes
//! - Provide a synthetic in-process implementation for demos and tests
//!
//! Real transports (RTSP, V4L2, file playback) live behind the same trait in
//! collaborator crates; the engine never assumes a concrete backend.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Frame;

/// Connection descriptor for one stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream URI (e.g. "rtsp://10.0.0.5:554/main", "synthetic://lobby")
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl StreamDescriptor {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            username: None,
            password: None,
        }
    }
}

/// Opens stream connections
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a connection to the described stream
    async fn open(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn StreamHandle>>;
}

/// An open stream connection. Owned exclusively by one capture loop.
#[async_trait]
pub trait StreamHandle: Send {
    /// Read the next frame
    async fn read_frame(&mut self) -> Result<Frame>;

    /// Release the connection
    async fn close(&mut self);
}

/// Synthetic frame generator.
///
/// Produces a static gradient background with a bright block that jumps to a
/// new position every 50 frames, so motion analysis fires periodically, plus
/// faint per-frame sensor noise below the diff threshold.
pub struct SyntheticConnector {
    width: u32,
    height: u32,
}

impl SyntheticConnector {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[async_trait]
impl StreamConnector for SyntheticConnector {
    async fn open(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn StreamHandle>> {
        tracing::info!(uri = %descriptor.uri, "Synthetic stream opened");
        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            frame_count: 0,
            scene_state: 0,
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

#[async_trait]
impl StreamHandle for SyntheticStream {
    async fn read_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        // Shift the scene occasionally to simulate motion events
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let mut data = vec![0u8; width * height * 3];

        for y in 0..height {
            for x in 0..width {
                let value = ((x + y) % 256) as u8;
                let base = (y * width + x) * 3;
                data[base] = value;
                data[base + 1] = value;
                data[base + 2] = value;
            }
        }

        // Bright block whose position is keyed by the scene state
        let block_w = (width / 4).max(1);
        let block_h = (height / 4).max(1);
        let bx = (self.scene_state as usize % 4) * (width / 4).max(1);
        let by = ((self.scene_state as usize / 4) % 4) * (height / 4).max(1);
        for y in by..(by + block_h).min(height) {
            for x in bx..(bx + block_w).min(width) {
                let base = (y * width + x) * 3;
                data[base] = 230;
                data[base + 1] = 230;
                data[base + 2] = 230;
            }
        }

        // Sub-threshold sensor noise
        let mut rng = rand::thread_rng();
        for i in (0..data.len()).step_by(97) {
            data[i] = data[i].wrapping_add(rng.gen_range(0..4));
        }

        Frame::from_raw(self.width, self.height, data)
    }

    async fn close(&mut self) {
        tracing::debug!(frames = self.frame_count, "Synthetic stream closed");
    }
}
