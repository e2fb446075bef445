//! DetectionPipeline - Per-Source Detection Orchestration
//!
//! ## Responsibilities
//!
//! - One detection task per source while the pipeline is running
//! - Sample the latest buffered frame, run all signals, fuse, publish
//! - Isolate per-cycle failures; only an external stop ends a loop
//!
//! The detection loop is a sampling consumer, not a queue drainer: it always
//! takes the most recent buffered frame, may skip frames under load, and
//! never blocks the capture loop.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::anomaly_detector::{AnomalyDetector, ScorerStatistics};
use crate::error::Result;
use crate::frame_ops;
use crate::inference::ModelSet;
use crate::models::{DetectionResult, FrameRecord, MotionAnalysis};
use crate::result_sink::ResultSink;
use crate::stream_manager::{FrameCallback, SourceConfig, StreamManager};

/// Retry delay while a source has no buffered frame yet
const FRAME_POLL_BACKOFF: Duration = Duration::from_millis(100);
/// Cycles slower than this are logged
const SLOW_CYCLE_WARN: Duration = Duration::from_millis(100);
/// Changed-pixel fraction above which a frame pair counts as motion
const MOTION_FRACTION_THRESHOLD: f32 = 0.01;

/// Running detection task for one source
struct DetectionTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Pipeline status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub total_detections: u64,
    pub total_anomalies: u64,
    pub total_objects: u64,
    pub active_sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// DetectionPipeline instance
pub struct DetectionPipeline {
    /// Self-reference handed to frame callbacks and detection tasks so they
    /// never keep a stopped pipeline alive
    weak_self: Weak<DetectionPipeline>,
    streams: Arc<StreamManager>,
    anomaly: Arc<AnomalyDetector>,
    models: ModelSet,
    sink: Arc<dyn ResultSink>,
    processing_interval: Duration,
    running: Arc<RwLock<bool>>,
    tasks: Mutex<HashMap<String, DetectionTask>>,
    /// Pipeline-owned frame callback ids, one per attached source
    callback_ids: Mutex<HashMap<String, Uuid>>,
    total_detections: AtomicU64,
    total_anomalies: AtomicU64,
    total_objects: AtomicU64,
}

impl DetectionPipeline {
    /// Create new DetectionPipeline
    pub fn new(
        streams: Arc<StreamManager>,
        anomaly: Arc<AnomalyDetector>,
        models: ModelSet,
        sink: Arc<dyn ResultSink>,
        processing_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            streams,
            anomaly,
            models,
            sink,
            processing_interval,
            running: Arc::new(RwLock::new(false)),
            tasks: Mutex::new(HashMap::new()),
            callback_ids: Mutex::new(HashMap::new()),
            total_detections: AtomicU64::new(0),
            total_anomalies: AtomicU64::new(0),
            total_objects: AtomicU64::new(0),
        })
    }

    /// Start the pipeline: attach to every registered source and start all
    /// capture loops. Each source's detection task spawns on its first frame.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Pipeline already running");
                return;
            }
            *running = true;
        }
        tracing::info!("Starting detection pipeline");

        let ids = self.streams.source_ids().await;
        for id in &ids {
            self.attach(id).await;
        }
        self.streams.start_all_sources().await;

        tracing::info!(sources = ids.len(), "Detection pipeline started");
    }

    /// Stop the pipeline: cancel all detection tasks concurrently, await
    /// them, then stop all capture loops. Not complete until every task has
    /// exited.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        tracing::info!("Stopping detection pipeline");

        let tasks: Vec<(String, DetectionTask)> =
            { self.tasks.lock().await.drain().collect() };
        for (_, task) in &tasks {
            let _ = task.cancel.send(true);
        }
        join_all(tasks.into_iter().map(|(source_id, task)| async move {
            if let Err(e) = task.handle.await {
                tracing::warn!(source_id = %source_id, error = %e, "Detection task join failed");
            }
        }))
        .await;

        self.streams.stop_all_sources().await;
        tracing::info!("Detection pipeline stopped");
    }

    /// Register a source with the pipeline
    pub async fn add_source(&self, config: SourceConfig) -> Result<()> {
        let source_id = config.source_id.clone();
        self.streams.add_source(config).await?;
        if *self.running.read().await {
            self.attach(&source_id).await;
            if let Err(e) = self.streams.start_source(&source_id).await {
                tracing::error!(source_id = %source_id, error = %e, "Failed to start added source");
            }
        }
        Ok(())
    }

    /// Remove a source and all of its pipeline state
    pub async fn remove_source(&self, source_id: &str) -> Result<()> {
        if let Some(task) = self.tasks.lock().await.remove(source_id) {
            let _ = task.cancel.send(true);
            if let Err(e) = task.handle.await {
                tracing::warn!(source_id = %source_id, error = %e, "Detection task join failed");
            }
        }
        self.callback_ids.lock().await.remove(source_id);

        self.streams.remove_source(source_id).await?;
        self.anomaly.evict_source(source_id).await;
        tracing::info!(source_id = %source_id, "Source removed from pipeline");
        Ok(())
    }

    /// The stream manager backing this pipeline (source/frame surface)
    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    /// Pipeline status snapshot
    pub async fn status(&self) -> PipelineStatus {
        let active_sources: Vec<String> =
            { self.tasks.lock().await.keys().cloned().collect() };
        PipelineStatus {
            running: *self.running.read().await,
            total_detections: self.total_detections.load(Ordering::Relaxed),
            total_anomalies: self.total_anomalies.load(Ordering::Relaxed),
            total_objects: self.total_objects.load(Ordering::Relaxed),
            active_sources,
            timestamp: Utc::now(),
        }
    }

    /// Update the anomaly threshold at runtime
    pub async fn update_anomaly_threshold(&self, threshold: f32) {
        self.anomaly.update_threshold(threshold).await;
    }

    /// Record false-positive feedback for a source
    pub fn submit_false_positive_feedback(&self, source_id: &str) {
        self.anomaly.submit_false_positive_feedback(source_id);
    }

    /// Anomaly scorer statistics
    pub async fn scorer_statistics(&self) -> ScorerStatistics {
        self.anomaly.statistics().await
    }

    /// Register the pipeline's own frame callback on a source. The callback
    /// spawns the source's detection task on first frame arrival.
    async fn attach(&self, source_id: &str) {
        {
            let ids = self.callback_ids.lock().await;
            if ids.contains_key(source_id) {
                return;
            }
        }

        let weak = self.weak_self.clone();
        let callback: FrameCallback = Arc::new(
            move |source_id: String, _record: FrameRecord| -> BoxFuture<'static, Result<()>> {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(pipeline) = weak.upgrade() {
                        pipeline.ensure_detection_task(&source_id).await;
                    }
                    Ok(())
                })
            },
        );

        match self.streams.register_frame_callback(source_id, callback).await {
            Ok(callback_id) => {
                self.callback_ids
                    .lock()
                    .await
                    .insert(source_id.to_string(), callback_id);
            }
            Err(e) => {
                tracing::warn!(source_id = %source_id, error = %e, "Failed to attach pipeline callback");
            }
        }
    }

    /// Spawn the detection task for a source if it is not already running
    async fn ensure_detection_task(&self, source_id: &str) {
        if !*self.running.read().await {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(source_id) {
            if !task.handle.is_finished() {
                return;
            }
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_detection(
            self.weak_self.clone(),
            source_id.to_string(),
            cancel_rx,
        ));
        tasks.insert(
            source_id.to_string(),
            DetectionTask {
                cancel: cancel_tx,
                handle,
            },
        );
        tracing::info!(source_id = %source_id, "Detection task started");
    }

    /// One detection cycle. Returns false if no frame was available.
    async fn run_cycle(&self, source_id: &str) -> Result<bool> {
        let Some(record) = self.streams.latest_frame(source_id).await? else {
            return Ok(false);
        };
        let frame = record.frame.clone();

        let objects = match self.models.detect_objects(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Object detection failed");
                Vec::new()
            }
        };
        let anomaly = self.anomaly.score(source_id, &frame).await;
        let faces = match self.models.detect_faces(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Face detection failed");
                Vec::new()
            }
        };
        let motion = self.analyze_motion(source_id).await;

        let result =
            DetectionResult::fuse(source_id, record.captured_at, objects, faces, motion, anomaly);

        if result.has_detection {
            if let Err(e) = self.sink.publish(&result).await {
                tracing::warn!(source_id = %source_id, error = %e, "Result sink publish failed");
            }
            tracing::info!(
                source_id = %source_id,
                types = ?result.detection_types,
                confidence = result.overall_confidence,
                risk = ?result.risk_level,
                "Detection recorded"
            );
        }
        self.update_statistics(&result);

        Ok(true)
    }

    /// Diff the two most recent buffered frames. Fewer than two frames means
    /// no motion.
    async fn analyze_motion(&self, source_id: &str) -> MotionAnalysis {
        let history = match self.streams.frame_history(source_id, 2).await {
            Ok(history) => history,
            Err(_) => return MotionAnalysis::default(),
        };
        if history.len() < 2 {
            return MotionAnalysis::default();
        }

        let previous = frame_ops::to_gray(&history[0].frame);
        let current = frame_ops::to_gray(&history[1].frame);
        let (fraction, changed) = frame_ops::motion_fraction(&current, &previous);

        MotionAnalysis {
            has_motion: fraction > MOTION_FRACTION_THRESHOLD,
            motion_fraction: fraction,
            changed_pixels: changed,
        }
    }

    fn update_statistics(&self, result: &DetectionResult) {
        if result.has_detection {
            self.total_detections.fetch_add(1, Ordering::Relaxed);
        }
        if result.anomaly.is_anomaly {
            self.total_anomalies.fetch_add(1, Ordering::Relaxed);
        }
        self.total_objects
            .fetch_add(result.objects.len() as u64, Ordering::Relaxed);
    }
}

/// The per-source detection loop. Cycle failures are logged and treated as
/// "no detection this cycle"; only cancellation ends the loop.
async fn run_detection(
    pipeline: Weak<DetectionPipeline>,
    source_id: String,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tracing::info!(source_id = %source_id, "Detection loop running");

    loop {
        if *cancel_rx.borrow() {
            break;
        }
        let Some(pipeline) = pipeline.upgrade() else {
            break;
        };
        let cycle_start = Instant::now();

        let processed = match pipeline.run_cycle(&source_id).await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Detection cycle failed");
                false
            }
        };

        let elapsed = cycle_start.elapsed();
        if processed && elapsed > SLOW_CYCLE_WARN {
            tracing::warn!(
                source_id = %source_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow detection cycle"
            );
        }

        let delay = if processed {
            pipeline.processing_interval
        } else {
            FRAME_POLL_BACKOFF
        };
        tokio::select! {
            _ = cancel_rx.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!(source_id = %source_id, "Detection loop stopped");
}
