//! Shared models and types for the Argos engine
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};

/// One captured image. Immutable after capture; shared across tasks as
/// `Arc<Frame>` so readers never observe concurrent mutation.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    /// Build a frame from raw RGB8 bytes (row-major, 3 bytes per pixel)
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let pixels = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            Error::Validation(format!(
                "pixel buffer does not match {}x{} RGB8 dimensions",
                width, height
            ))
        })?;
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// One buffered frame plus capture metadata
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub frame: Arc<Frame>,
    pub captured_at: DateTime<Utc>,
    /// Monotonically increasing per-source sequence number
    pub sequence: u64,
}

/// Bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One object/face detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Which signals contributed to a detection result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    Object,
    Anomaly,
    Face,
    Motion,
}

/// Coarse severity classification of a fused result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Frame-to-frame motion analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotionAnalysis {
    pub has_motion: bool,
    /// Fraction of pixels that changed beyond the diff threshold (0.0 - 1.0)
    pub motion_fraction: f32,
    pub changed_pixels: u64,
}

/// Per-signal anomaly score breakdown.
///
/// `None` means the signal was unavailable for this frame (no model loaded,
/// not enough history) and is excluded from the fused weighted average.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub reconstruction: Option<f32>,
    pub temporal: Option<f32>,
    pub attention: Option<f32>,
    pub motion: Option<f32>,
}

/// Fused anomaly assessment for one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyAssessment {
    /// Combined score in [0, 1]
    pub score: f32,
    pub is_anomaly: bool,
    pub signals: SignalBreakdown,
}

/// One fused detection decision for one frame. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub source_id: String,
    pub captured_at: DateTime<Utc>,
    pub has_detection: bool,
    pub overall_confidence: f32,
    pub detection_types: Vec<DetectionType>,
    pub risk_level: RiskLevel,
    pub objects: Vec<Detection>,
    pub faces: Vec<Detection>,
    pub motion: MotionAnalysis,
    pub anomaly: AnomalyAssessment,
}

impl DetectionResult {
    /// Fuse the per-signal outputs into one decision.
    ///
    /// `overall_confidence` is the maximum confidence across contributing
    /// signals: a single strong signal dominates rather than being diluted
    /// by weak ones.
    pub fn fuse(
        source_id: &str,
        captured_at: DateTime<Utc>,
        objects: Vec<Detection>,
        faces: Vec<Detection>,
        motion: MotionAnalysis,
        anomaly: AnomalyAssessment,
    ) -> Self {
        let has_detection = !objects.is_empty()
            || anomaly.is_anomaly
            || !faces.is_empty()
            || motion.has_motion;

        let mut confidences: Vec<f32> = objects.iter().map(|d| d.confidence).collect();
        if anomaly.is_anomaly {
            confidences.push(anomaly.score);
        }
        confidences.extend(faces.iter().map(|d| d.confidence));
        if motion.has_motion {
            confidences.push(motion.motion_fraction);
        }
        let overall_confidence = confidences.iter().copied().fold(0.0_f32, f32::max);

        let mut detection_types = Vec::new();
        if !objects.is_empty() {
            detection_types.push(DetectionType::Object);
        }
        if anomaly.is_anomaly {
            detection_types.push(DetectionType::Anomaly);
        }
        if !faces.is_empty() {
            detection_types.push(DetectionType::Face);
        }
        if motion.has_motion {
            detection_types.push(DetectionType::Motion);
        }

        let risk_level = if anomaly.is_anomaly || objects.len() > 2 {
            RiskLevel::High
        } else if !objects.is_empty() || !faces.is_empty() {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Self {
            source_id: source_id.to_string(),
            captured_at,
            has_detection,
            overall_confidence,
            detection_types,
            risk_level,
            objects,
            faces,
            motion,
            anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
        }
    }

    #[test]
    fn test_fuse_objects_take_max_confidence() {
        let result = DetectionResult::fuse(
            "cam-001",
            Utc::now(),
            vec![detection("person", 0.9), detection("car", 0.4)],
            vec![],
            MotionAnalysis::default(),
            AnomalyAssessment::default(),
        );

        assert!(result.has_detection);
        assert_eq!(result.overall_confidence, 0.9);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.detection_types, vec![DetectionType::Object]);
    }

    #[test]
    fn test_fuse_anomaly_is_high_risk() {
        let anomaly = AnomalyAssessment {
            score: 0.6,
            is_anomaly: true,
            signals: SignalBreakdown::default(),
        };
        let result = DetectionResult::fuse(
            "cam-001",
            Utc::now(),
            vec![],
            vec![],
            MotionAnalysis::default(),
            anomaly,
        );

        assert!(result.has_detection);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.overall_confidence, 0.6);
        assert_eq!(result.detection_types, vec![DetectionType::Anomaly]);
    }

    #[test]
    fn test_fuse_many_objects_is_high_risk() {
        let objects = vec![
            detection("person", 0.5),
            detection("person", 0.6),
            detection("person", 0.7),
        ];
        let result = DetectionResult::fuse(
            "cam-001",
            Utc::now(),
            objects,
            vec![],
            MotionAnalysis::default(),
            AnomalyAssessment::default(),
        );

        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_fuse_nothing_is_low_risk() {
        let result = DetectionResult::fuse(
            "cam-001",
            Utc::now(),
            vec![],
            vec![],
            MotionAnalysis::default(),
            AnomalyAssessment::default(),
        );

        assert!(!result.has_detection);
        assert_eq!(result.overall_confidence, 0.0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.detection_types.is_empty());
    }

    #[test]
    fn test_fuse_motion_only() {
        let motion = MotionAnalysis {
            has_motion: true,
            motion_fraction: 0.05,
            changed_pixels: 1500,
        };
        let result = DetectionResult::fuse(
            "cam-001",
            Utc::now(),
            vec![],
            vec![],
            motion,
            AnomalyAssessment::default(),
        );

        assert!(result.has_detection);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.detection_types, vec![DetectionType::Motion]);
        assert!((result.overall_confidence - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn test_frame_from_raw_validates_dimensions() {
        assert!(Frame::from_raw(4, 4, vec![0u8; 4 * 4 * 3]).is_ok());
        assert!(Frame::from_raw(4, 4, vec![0u8; 7]).is_err());
    }
}
