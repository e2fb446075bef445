//! AnomalyDetector - Multi-Signal Anomaly Scoring
//!
//! ## Responsibilities
//!
//! - Per-source rolling windows of preprocessed frames and fused scores
//! - Four independent signals: reconstruction, temporal, attention, motion
//! - Weighted fusion with renormalization over available signals
//! - Runtime-adjustable threshold and false-positive feedback hook

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::frame_ops::{self, PreprocessedFrame};
use crate::inference::{AttentionModel, ReconstructionModel, SequenceModel};
use crate::models::{AnomalyAssessment, Frame, SignalBreakdown};

/// Fusion weights. Weights of unavailable signals are excluded and the
/// denominator renormalized to the sum of weights actually used.
const WEIGHT_RECONSTRUCTION: f32 = 0.3;
const WEIGHT_TEMPORAL: f32 = 0.3;
const WEIGHT_ATTENTION: f32 = 0.2;
const WEIGHT_MOTION: f32 = 0.2;

/// Reconstruction error to score gain
const RECONSTRUCTION_GAIN: f32 = 10.0;
/// Frames kept per source for temporal/motion signals
const FRAME_WINDOW: usize = 10;
/// Fused scores kept per source
const SCORE_WINDOW: usize = 10;
/// Frames required before the temporal signal is available
const TEMPORAL_SEQUENCE_LEN: usize = 5;
/// Motion fraction above this is scored as excessive motion
const EXCESSIVE_MOTION_FRACTION: f32 = 0.3;
/// Motion fraction below this is scored as suspiciously static
const STATIC_MOTION_FRACTION: f32 = 0.001;
/// Score assigned to a suspiciously static scene
const STATIC_MOTION_SCORE: f32 = 0.5;

/// Optional anomaly signal models
#[derive(Clone, Default)]
pub struct AnomalyModels {
    pub reconstruction: Option<Arc<dyn ReconstructionModel>>,
    pub sequence: Option<Arc<dyn SequenceModel>>,
    pub attention: Option<Arc<dyn AttentionModel>>,
}

/// Per-source rolling scoring state
struct ScoringState {
    frames: VecDeque<PreprocessedFrame>,
    scores: VecDeque<f32>,
}

impl ScoringState {
    fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(FRAME_WINDOW),
            scores: VecDeque::with_capacity(SCORE_WINDOW),
        }
    }

    fn push_frame(&mut self, frame: PreprocessedFrame) {
        if self.frames.len() >= FRAME_WINDOW {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    fn push_score(&mut self, score: f32) {
        if self.scores.len() >= SCORE_WINDOW {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
    }
}

/// Scoring statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScorerStatistics {
    pub frames_processed: u64,
    pub anomalies_detected: u64,
    pub false_positive_count: u64,
    pub anomaly_rate: f64,
    pub tracked_sources: usize,
}

/// AnomalyDetector instance
pub struct AnomalyDetector {
    models: AnomalyModels,
    threshold: RwLock<f32>,
    /// Per-source scoring state; each source gets its own lock so unrelated
    /// sources never contend
    states: RwLock<HashMap<String, Arc<Mutex<ScoringState>>>>,
    frames_processed: AtomicU64,
    anomalies_detected: AtomicU64,
    false_positive_count: AtomicU64,
}

impl AnomalyDetector {
    /// Create new AnomalyDetector
    pub fn new(models: AnomalyModels, threshold: f32) -> Self {
        Self {
            models,
            threshold: RwLock::new(threshold.clamp(0.0, 1.0)),
            states: RwLock::new(HashMap::new()),
            frames_processed: AtomicU64::new(0),
            anomalies_detected: AtomicU64::new(0),
            false_positive_count: AtomicU64::new(0),
        }
    }

    /// Score one frame for one source.
    ///
    /// Signal failures are isolated: a model error logs and excludes that
    /// signal for this frame, it never propagates.
    pub async fn score(&self, source_id: &str, frame: &Frame) -> AnomalyAssessment {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);

        let state_lock = self.state_for(source_id).await;
        let mut state = state_lock.lock().await;

        state.push_frame(frame_ops::preprocess(frame));
        let Some(current) = state.frames.back() else {
            return AnomalyAssessment::default();
        };

        let reconstruction = self.reconstruction_signal(source_id, current).await;
        let temporal = self.temporal_signal(source_id, &state.frames).await;
        let attention = self.attention_signal(source_id, current).await;
        let motion = motion_signal(&state.frames);

        let signals = SignalBreakdown {
            reconstruction,
            temporal,
            attention,
            motion,
        };
        let score = fuse_signals(&signals);
        let threshold = *self.threshold.read().await;
        let is_anomaly = score > threshold;

        if is_anomaly {
            self.anomalies_detected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                source_id = %source_id,
                score = score,
                threshold = threshold,
                signals = ?signals,
                "Anomaly detected"
            );
        }

        state.push_score(score);

        AnomalyAssessment {
            score,
            is_anomaly,
            signals,
        }
    }

    /// Update the anomaly threshold at runtime
    pub async fn update_threshold(&self, threshold: f32) {
        let clamped = threshold.clamp(0.0, 1.0);
        *self.threshold.write().await = clamped;
        tracing::info!(threshold = clamped, "Anomaly threshold updated");
    }

    /// Current anomaly threshold
    pub async fn threshold(&self) -> f32 {
        *self.threshold.read().await
    }

    /// Record a false-positive report. Counter only: a hook for future
    /// recalibration, deliberately not wired into scoring.
    pub fn submit_false_positive_feedback(&self, source_id: &str) {
        self.false_positive_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(source_id = %source_id, "False positive feedback recorded");
    }

    /// Drop the scoring state for a removed source
    pub async fn evict_source(&self, source_id: &str) {
        if self.states.write().await.remove(source_id).is_some() {
            tracing::debug!(source_id = %source_id, "Anomaly state evicted");
        }
    }

    /// Get scoring statistics
    pub async fn statistics(&self) -> ScorerStatistics {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let anomalies = self.anomalies_detected.load(Ordering::Relaxed);
        ScorerStatistics {
            frames_processed: frames,
            anomalies_detected: anomalies,
            false_positive_count: self.false_positive_count.load(Ordering::Relaxed),
            anomaly_rate: anomalies as f64 / frames.max(1) as f64,
            tracked_sources: self.states.read().await.len(),
        }
    }

    async fn reconstruction_signal(
        &self,
        source_id: &str,
        current: &PreprocessedFrame,
    ) -> Option<f32> {
        let model = self.models.reconstruction.as_ref()?;
        match model.reconstruct(current).await {
            Ok(reconstructed) => {
                let error = frame_ops::reconstruction_error(current, &reconstructed);
                Some((error * RECONSTRUCTION_GAIN).clamp(0.0, 1.0))
            }
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Reconstruction signal failed");
                None
            }
        }
    }

    async fn temporal_signal(
        &self,
        source_id: &str,
        frames: &VecDeque<PreprocessedFrame>,
    ) -> Option<f32> {
        let model = self.models.sequence.as_ref()?;
        if frames.len() < TEMPORAL_SEQUENCE_LEN {
            return None;
        }

        let sequence: Vec<Vec<f32>> = frames
            .iter()
            .skip(frames.len() - TEMPORAL_SEQUENCE_LEN)
            .map(frame_ops::extract_features)
            .collect();

        match model.score_sequence(&sequence).await {
            Ok(score) => Some(score.clamp(0.0, 1.0)),
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Temporal signal failed");
                None
            }
        }
    }

    async fn attention_signal(
        &self,
        source_id: &str,
        current: &PreprocessedFrame,
    ) -> Option<f32> {
        let model = self.models.attention.as_ref()?;
        let features = frame_ops::extract_features(current);
        match model.score_attention(&features).await {
            Ok(score) => Some(score.clamp(0.0, 1.0)),
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Attention signal failed");
                None
            }
        }
    }

    async fn state_for(&self, source_id: &str) -> Arc<Mutex<ScoringState>> {
        {
            let states = self.states.read().await;
            if let Some(state) = states.get(source_id) {
                return state.clone();
            }
        }

        let mut states = self.states.write().await;
        states
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ScoringState::new())))
            .clone()
    }
}

/// Motion signal over the preprocessed frame window.
///
/// Excessive motion scores up, but a suspiciously static scene also scores:
/// near-zero change is itself unusual for a live camera (frozen feed, lens
/// covered), an inversion of the usual more-motion-is-worse assumption.
fn motion_signal(frames: &VecDeque<PreprocessedFrame>) -> Option<f32> {
    if frames.len() < 2 {
        return None;
    }
    let current = frames.back()?;
    let previous = frames.get(frames.len() - 2)?;
    let fraction = frame_ops::preprocessed_motion_fraction(current, previous);

    let score = if fraction > EXCESSIVE_MOTION_FRACTION {
        (fraction * 2.0).min(1.0)
    } else if fraction < STATIC_MOTION_FRACTION {
        STATIC_MOTION_SCORE
    } else {
        0.0
    };
    Some(score)
}

/// Weighted average over available signals, clamped to [0, 1]
fn fuse_signals(signals: &SignalBreakdown) -> f32 {
    let weighted = [
        (signals.reconstruction, WEIGHT_RECONSTRUCTION),
        (signals.temporal, WEIGHT_TEMPORAL),
        (signals.attention, WEIGHT_ATTENTION),
        (signals.motion, WEIGHT_MOTION),
    ];

    let mut sum = 0.0;
    let mut total_weight = 0.0;
    for (score, weight) in weighted {
        if let Some(score) = score {
            sum += score * weight;
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        (sum / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    fn solid_frame(value: u8) -> Frame {
        Frame::from_raw(32, 32, vec![value; 32 * 32 * 3]).unwrap()
    }

    struct FixedSequenceModel(f32);

    #[async_trait]
    impl SequenceModel for FixedSequenceModel {
        async fn score_sequence(&self, _sequence: &[Vec<f32>]) -> Result<f32> {
            Ok(self.0)
        }
    }

    struct FailingAttentionModel;

    #[async_trait]
    impl AttentionModel for FailingAttentionModel {
        async fn score_attention(&self, _features: &[f32]) -> Result<f32> {
            Err(crate::error::Error::Inference("model offline".to_string()))
        }
    }

    #[test]
    fn test_fuse_renormalizes_over_available_signals() {
        let signals = SignalBreakdown {
            reconstruction: Some(0.8),
            temporal: None,
            attention: None,
            motion: Some(0.2),
        };
        let score = fuse_signals(&signals);
        assert!((score - 0.56).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_all_signals() {
        let signals = SignalBreakdown {
            reconstruction: Some(1.0),
            temporal: Some(1.0),
            attention: Some(1.0),
            motion: Some(1.0),
        };
        assert!((fuse_signals(&signals) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_no_signals_is_zero() {
        assert_eq!(fuse_signals(&SignalBreakdown::default()), 0.0);
    }

    #[test]
    fn test_fuse_is_clamped() {
        let signals = SignalBreakdown {
            reconstruction: Some(5.0),
            temporal: None,
            attention: None,
            motion: None,
        };
        assert_eq!(fuse_signals(&signals), 1.0);
    }

    #[tokio::test]
    async fn test_first_frame_has_no_signals() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        let assessment = detector.score("cam-001", &solid_frame(100)).await;

        assert_eq!(assessment.score, 0.0);
        assert!(!assessment.is_anomaly);
        assert!(assessment.signals.motion.is_none());
    }

    #[tokio::test]
    async fn test_static_scene_scores_half() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        detector.score("cam-001", &solid_frame(100)).await;
        let assessment = detector.score("cam-001", &solid_frame(100)).await;

        // Identical frames: suspiciously static, motion signal = 0.5, and the
        // only available signal carries the full fused weight
        assert_eq!(assessment.signals.motion, Some(0.5));
        assert!((assessment.score - 0.5).abs() < 1e-6);
        // Threshold is strict: 0.5 > 0.5 is false
        assert!(!assessment.is_anomaly);
    }

    #[tokio::test]
    async fn test_threshold_is_strictly_exceeded() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.4);
        detector.score("cam-001", &solid_frame(100)).await;
        let assessment = detector.score("cam-001", &solid_frame(100)).await;

        assert!((assessment.score - 0.5).abs() < 1e-6);
        assert!(assessment.is_anomaly);
    }

    #[tokio::test]
    async fn test_excessive_motion_scores_up() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        detector.score("cam-001", &solid_frame(0)).await;
        let assessment = detector.score("cam-001", &solid_frame(255)).await;

        // Full-frame change: fraction 1.0 -> min(2.0, 1.0) = 1.0
        assert_eq!(assessment.signals.motion, Some(1.0));
        assert!(assessment.is_anomaly);
    }

    #[tokio::test]
    async fn test_temporal_signal_needs_five_frames() {
        let models = AnomalyModels {
            sequence: Some(Arc::new(FixedSequenceModel(0.9))),
            ..Default::default()
        };
        let detector = AnomalyDetector::new(models, 0.5);

        for i in 0..4 {
            let assessment = detector.score("cam-001", &solid_frame(i * 10)).await;
            assert!(assessment.signals.temporal.is_none());
        }
        let assessment = detector.score("cam-001", &solid_frame(40)).await;
        assert_eq!(assessment.signals.temporal, Some(0.9));
    }

    #[tokio::test]
    async fn test_model_failure_excludes_signal() {
        let models = AnomalyModels {
            attention: Some(Arc::new(FailingAttentionModel)),
            ..Default::default()
        };
        let detector = AnomalyDetector::new(models, 0.5);
        let assessment = detector.score("cam-001", &solid_frame(100)).await;

        assert!(assessment.signals.attention.is_none());
        assert_eq!(assessment.score, 0.0);
    }

    #[tokio::test]
    async fn test_scores_stay_in_unit_range() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        for i in 0..20u32 {
            let value = if i % 2 == 0 { 0 } else { 255 };
            let assessment = detector.score("cam-001", &solid_frame(value)).await;
            assert!((0.0..=1.0).contains(&assessment.score));
        }
    }

    #[tokio::test]
    async fn test_update_threshold_clamps() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        detector.update_threshold(1.7).await;
        assert_eq!(detector.threshold().await, 1.0);
        detector.update_threshold(-0.3).await;
        assert_eq!(detector.threshold().await, 0.0);
    }

    #[tokio::test]
    async fn test_feedback_increments_counter_only() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        detector.submit_false_positive_feedback("cam-001");
        detector.submit_false_positive_feedback("cam-001");

        let stats = detector.statistics().await;
        assert_eq!(stats.false_positive_count, 2);
    }

    #[tokio::test]
    async fn test_evict_source_drops_state() {
        let detector = AnomalyDetector::new(AnomalyModels::default(), 0.5);
        detector.score("cam-001", &solid_frame(100)).await;
        assert_eq!(detector.statistics().await.tracked_sources, 1);

        detector.evict_source("cam-001").await;
        assert_eq!(detector.statistics().await.tracked_sources, 0);

        // Fresh state: motion unavailable again on the next frame
        let assessment = detector.score("cam-001", &solid_frame(100)).await;
        assert!(assessment.signals.motion.is_none());
    }
}
