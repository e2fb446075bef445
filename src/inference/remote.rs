//! RemoteDetector - HTTP inference offload adapter
//!
//! ## Responsibilities
//!
//! - JPEG-encode frames and post them to a remote inference server
//! - Parse detection responses into engine types
//!
//! The wire contract: POST multipart `image` part to
//! `{base_url}/detect/objects` or `{base_url}/detect/faces`, response is a
//! JSON array of `{label, confidence, bbox: [x1, y1, x2, y2]}`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use super::{FaceDetector, ObjectDetector};
use crate::error::{Error, Result};
use crate::frame_ops;
use crate::models::{BoundingBox, Detection, Frame};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote object/face detector
pub struct RemoteDetector {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// Detection entry as returned by the inference server
#[derive(Debug, Deserialize)]
struct RemoteDetection {
    label: String,
    confidence: f32,
    bbox: [f32; 4],
}

impl RemoteDetector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn request(&self, endpoint: &str, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = frame_ops::encode_jpeg(frame)?;
        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Inference(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let detections: Vec<RemoteDetection> = response.json().await?;
        Ok(detections
            .into_iter()
            .map(|d| Detection {
                label: d.label,
                confidence: d.confidence,
                bbox: BoundingBox {
                    x1: d.bbox[0],
                    y1: d.bbox[1],
                    x2: d.bbox[2],
                    y2: d.bbox[3],
                },
            })
            .collect())
    }
}

#[async_trait]
impl ObjectDetector for RemoteDetector {
    async fn detect_objects(&self, frame: &Frame) -> Result<Vec<Detection>> {
        self.request("detect/objects", frame).await
    }
}

#[async_trait]
impl FaceDetector for RemoteDetector {
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<Detection>> {
        self.request("detect/faces", frame).await
    }
}
