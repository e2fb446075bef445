//! Inference collaborator contracts
//!
//! The engine consumes detection and anomaly models as opaque scoring
//! functions. Every call site defines its zero-signal behavior when a
//! backing model is absent: no detector means no detections, no anomaly
//! model means that signal is excluded from fusion.

pub mod remote;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::frame_ops::PreprocessedFrame;
use crate::models::{Detection, Frame};

pub use remote::RemoteDetector;

/// Object detection model
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect_objects(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Face detection model
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Encode/decode model used for the reconstruction anomaly signal
#[async_trait]
pub trait ReconstructionModel: Send + Sync {
    async fn reconstruct(&self, frame: &PreprocessedFrame) -> Result<PreprocessedFrame>;
}

/// Sequence model used for the temporal anomaly signal
#[async_trait]
pub trait SequenceModel: Send + Sync {
    async fn score_sequence(&self, sequence: &[Vec<f32>]) -> Result<f32>;
}

/// Attention-style model used for the single-frame anomaly signal
#[async_trait]
pub trait AttentionModel: Send + Sync {
    async fn score_attention(&self, features: &[f32]) -> Result<f32>;
}

/// Detection models available to the pipeline. Absent models yield empty
/// detection lists.
#[derive(Clone, Default)]
pub struct ModelSet {
    pub object_detector: Option<Arc<dyn ObjectDetector>>,
    pub face_detector: Option<Arc<dyn FaceDetector>>,
}

impl ModelSet {
    pub async fn detect_objects(&self, frame: &Frame) -> Result<Vec<Detection>> {
        match &self.object_detector {
            Some(detector) => detector.detect_objects(frame).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn detect_faces(&self, frame: &Frame) -> Result<Vec<Detection>> {
        match &self.face_detector {
            Some(detector) => detector.detect_faces(frame).await,
            None => Ok(Vec::new()),
        }
    }
}
