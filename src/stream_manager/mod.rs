//! StreamManager - Multi-Source Capture Orchestration
//!
//! ## Responsibilities
//!
//! - Source registry (add/remove/status) with per-source state sharding
//! - One capture loop task per started source: read, buffer, fan out
//! - Frame-rate pacing and bounded reconnection on sustained failure
//! - Bounded frame buffering with most-recent-wins eviction
//!
//! Each source's state lives in its own `SourceSlot` behind its own locks,
//! so structural add/remove and unrelated sources never contend on a global
//! exclusion mechanism.

pub mod frame_buffer;
pub mod types;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connector::{StreamConnector, StreamDescriptor, StreamHandle};
use crate::error::{Error, Result};
use crate::frame_ops;
use crate::models::FrameRecord;

pub use frame_buffer::FrameBuffer;
pub use types::{Snapshot, SourceConfig, SourceRuntime, SourceState, SourceStatus, StreamStats};

/// Per-frame callback. Runs to completion (in registration order) before the
/// next frame is captured; a failure is logged and isolated.
pub type FrameCallback =
    Arc<dyn Fn(String, FrameRecord) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Capture loop timing knobs
#[derive(Debug, Clone)]
pub struct CaptureTuning {
    /// Consecutive read errors beyond this trigger one reconnection attempt
    pub error_threshold: u32,
    /// Cool-down before the reconnection attempt
    pub reconnect_cooldown: Duration,
    /// Backoff after a transient read failure
    pub read_backoff: Duration,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            error_threshold: 10,
            reconnect_cooldown: Duration::from_secs(5),
            read_backoff: Duration::from_secs(1),
        }
    }
}

/// Running capture task for one source
struct CaptureTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// All state for one source
struct SourceSlot {
    config: RwLock<SourceConfig>,
    runtime: RwLock<SourceRuntime>,
    buffer: RwLock<FrameBuffer>,
    callbacks: RwLock<Vec<(Uuid, FrameCallback)>>,
    task: Mutex<Option<CaptureTask>>,
}

impl SourceSlot {
    fn new(config: SourceConfig, buffer_capacity: usize) -> Self {
        Self {
            config: RwLock::new(config),
            runtime: RwLock::new(SourceRuntime::default()),
            buffer: RwLock::new(FrameBuffer::new(buffer_capacity)),
            callbacks: RwLock::new(Vec::new()),
            task: Mutex::new(None),
        }
    }

    async fn set_state(&self, state: SourceState) {
        self.runtime.write().await.state = state;
    }

    /// Successful read: reset the error streak and stamp the frame
    async fn record_success(&self, at: chrono::DateTime<Utc>) {
        let mut runtime = self.runtime.write().await;
        runtime.error_count = 0;
        runtime.frame_count += 1;
        runtime.last_frame_at = Some(at);
    }

    /// Failed read: bump the error streak, returning the new count
    async fn record_read_error(&self, error: &Error) -> u32 {
        let mut runtime = self.runtime.write().await;
        runtime.error_count += 1;
        runtime.last_error = Some(error.to_string());
        runtime.error_count
    }

    /// Terminal failure: the loop is done until the next external start
    async fn record_failure(&self, message: String) {
        let mut runtime = self.runtime.write().await;
        runtime.state = SourceState::Stopped;
        runtime.last_error = Some(message);
    }

    async fn mark_streaming(&self) {
        let mut runtime = self.runtime.write().await;
        runtime.state = SourceState::Streaming;
        runtime.error_count = 0;
    }
}

/// StreamManager instance
pub struct StreamManager {
    connector: Arc<dyn StreamConnector>,
    sources: RwLock<HashMap<String, Arc<SourceSlot>>>,
    buffer_capacity: usize,
    tuning: CaptureTuning,
    total_frames: Arc<AtomicU64>,
}

impl StreamManager {
    /// Create new StreamManager
    pub fn new(connector: Arc<dyn StreamConnector>, buffer_capacity: usize) -> Self {
        Self::with_tuning(connector, buffer_capacity, CaptureTuning::default())
    }

    /// Create with explicit capture timing
    pub fn with_tuning(
        connector: Arc<dyn StreamConnector>,
        buffer_capacity: usize,
        tuning: CaptureTuning,
    ) -> Self {
        Self {
            connector,
            sources: RwLock::new(HashMap::new()),
            buffer_capacity,
            tuning,
            total_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a source. Re-adding an existing id is rejected, not
    /// overwritten.
    pub async fn add_source(&self, config: SourceConfig) -> Result<()> {
        let source_id = config.source_id.clone();
        let mut sources = self.sources.write().await;
        if sources.contains_key(&source_id) {
            return Err(Error::Conflict(format!(
                "source {} already exists",
                source_id
            )));
        }
        let uri = config.descriptor.uri.clone();
        sources.insert(
            source_id.clone(),
            Arc::new(SourceSlot::new(config, self.buffer_capacity)),
        );
        tracing::info!(source_id = %source_id, uri = %uri, "Source added");
        Ok(())
    }

    /// Unregister a source: stop streaming first, then drop all per-source
    /// state. The slot leaves the registry before teardown so no concurrent
    /// caller can observe a half-torn-down source.
    pub async fn remove_source(&self, source_id: &str) -> Result<()> {
        let slot = {
            let mut sources = self.sources.write().await;
            sources
                .remove(source_id)
                .ok_or_else(|| Error::NotFound(format!("source {} not found", source_id)))?
        };
        halt_capture(&slot, source_id).await;
        tracing::info!(source_id = %source_id, "Source removed");
        Ok(())
    }

    /// Start the capture loop for a source. No-op if already streaming;
    /// an open failure leaves the source Stopped and is returned to the
    /// caller.
    pub async fn start_source(&self, source_id: &str) -> Result<()> {
        let slot = self.slot(source_id).await?;
        let mut task_guard = slot.task.lock().await;
        if let Some(task) = task_guard.as_ref() {
            if !task.handle.is_finished() {
                tracing::debug!(source_id = %source_id, "Source already streaming");
                return Ok(());
            }
        }

        let (descriptor, frame_rate) = {
            let config = slot.config.read().await;
            if !config.enabled {
                return Err(Error::Validation(format!(
                    "source {} is disabled",
                    source_id
                )));
            }
            (config.descriptor.clone(), config.frame_rate)
        };

        slot.set_state(SourceState::Connecting).await;
        tracing::info!(source_id = %source_id, uri = %descriptor.uri, "Opening stream");

        let stream = match self.connector.open(&descriptor).await {
            Ok(stream) => stream,
            Err(e) => {
                slot.record_failure(format!("open failed: {}", e)).await;
                tracing::error!(source_id = %source_id, error = %e, "Failed to open stream");
                return Err(e);
            }
        };

        slot.mark_streaming().await;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let frame_interval = Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64);
        let handle = tokio::spawn(run_capture(
            self.connector.clone(),
            slot.clone(),
            source_id.to_string(),
            stream,
            descriptor,
            frame_interval,
            self.tuning.clone(),
            self.total_frames.clone(),
            cancel_rx,
        ));
        *task_guard = Some(CaptureTask {
            cancel: cancel_tx,
            handle,
        });
        tracing::info!(source_id = %source_id, "Capture loop spawned");
        Ok(())
    }

    /// Stop the capture loop for a source. Idempotent: stopping a stopped
    /// source is a no-op.
    pub async fn stop_source(&self, source_id: &str) -> Result<()> {
        let slot = self.slot(source_id).await?;
        halt_capture(&slot, source_id).await;
        Ok(())
    }

    /// Start all enabled sources concurrently
    pub async fn start_all_sources(&self) {
        let ids = self.source_ids().await;
        let started = join_all(ids.iter().map(|id| async move {
            match self.start_source(id).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(source_id = %id, error = %e, "Failed to start source");
                    false
                }
            }
        }))
        .await;
        let count = started.iter().filter(|ok| **ok).count();
        tracing::info!(started = count, total = ids.len(), "Sources started");
    }

    /// Stop all sources concurrently
    pub async fn stop_all_sources(&self) {
        let ids = self.source_ids().await;
        join_all(ids.iter().map(|id| async move {
            if let Err(e) = self.stop_source(id).await {
                tracing::error!(source_id = %id, error = %e, "Failed to stop source");
            }
        }))
        .await;
        tracing::info!(total = ids.len(), "Sources stopped");
    }

    /// Register a per-frame callback for a source
    pub async fn register_frame_callback(
        &self,
        source_id: &str,
        callback: FrameCallback,
    ) -> Result<Uuid> {
        let slot = self.slot(source_id).await?;
        let callback_id = Uuid::new_v4();
        slot.callbacks.write().await.push((callback_id, callback));
        tracing::debug!(source_id = %source_id, callback_id = %callback_id, "Frame callback registered");
        Ok(callback_id)
    }

    /// Remove a previously registered callback
    pub async fn remove_frame_callback(&self, source_id: &str, callback_id: Uuid) -> Result<()> {
        let slot = self.slot(source_id).await?;
        let mut callbacks = slot.callbacks.write().await;
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != callback_id);
        if callbacks.len() == before {
            return Err(Error::NotFound(format!(
                "callback {} not registered on source {}",
                callback_id, source_id
            )));
        }
        tracing::debug!(source_id = %source_id, callback_id = %callback_id, "Frame callback removed");
        Ok(())
    }

    /// Most recent buffered frame, if any
    pub async fn latest_frame(&self, source_id: &str) -> Result<Option<FrameRecord>> {
        let slot = self.slot(source_id).await?;
        let record = slot.buffer.read().await.latest();
        Ok(record)
    }

    /// Last `count` buffered frames in capture order
    pub async fn frame_history(&self, source_id: &str, count: usize) -> Result<Vec<FrameRecord>> {
        let slot = self.slot(source_id).await?;
        let history = slot.buffer.read().await.history(count);
        Ok(history)
    }

    /// JPEG snapshot of the latest frame
    pub async fn capture_snapshot(&self, source_id: &str) -> Result<Option<Snapshot>> {
        let Some(record) = self.latest_frame(source_id).await? else {
            return Ok(None);
        };
        let data = frame_ops::encode_jpeg(&record.frame)?;
        Ok(Some(Snapshot {
            source_id: source_id.to_string(),
            data,
            captured_at: record.captured_at,
        }))
    }

    /// Status snapshot for one source
    pub async fn status(&self, source_id: &str) -> Result<SourceStatus> {
        let slot = self.slot(source_id).await?;
        Ok(Self::slot_status(source_id, &slot).await)
    }

    /// Status snapshots for all sources
    pub async fn all_statuses(&self) -> HashMap<String, SourceStatus> {
        let slots: Vec<(String, Arc<SourceSlot>)> = {
            let sources = self.sources.read().await;
            sources
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        let mut statuses = HashMap::with_capacity(slots.len());
        for (id, slot) in slots {
            let status = Self::slot_status(&id, &slot).await;
            statuses.insert(id, status);
        }
        statuses
    }

    /// Aggregate statistics
    pub async fn stats(&self) -> StreamStats {
        let statuses = self.all_statuses().await;
        StreamStats {
            total_sources: statuses.len(),
            streaming_sources: statuses
                .values()
                .filter(|s| s.state == SourceState::Streaming)
                .count(),
            total_frames_captured: self.total_frames.load(Ordering::Relaxed),
        }
    }

    /// Registered source ids
    pub async fn source_ids(&self) -> Vec<String> {
        self.sources.read().await.keys().cloned().collect()
    }

    async fn slot(&self, source_id: &str) -> Result<Arc<SourceSlot>> {
        self.sources
            .read()
            .await
            .get(source_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source {} not found", source_id)))
    }

    async fn slot_status(source_id: &str, slot: &SourceSlot) -> SourceStatus {
        let config = slot.config.read().await.clone();
        let runtime = slot.runtime.read().await.clone();
        let buffered_frames = slot.buffer.read().await.len();
        SourceStatus {
            source_id: source_id.to_string(),
            state: runtime.state,
            enabled: config.enabled,
            frame_count: runtime.frame_count,
            error_count: runtime.error_count,
            last_frame_at: runtime.last_frame_at,
            last_error: runtime.last_error,
            buffered_frames,
            uri: config.descriptor.uri,
            resolution: config.resolution,
        }
    }
}

/// Cancel and await a source's capture task, if running
async fn halt_capture(slot: &SourceSlot, source_id: &str) {
    let task = slot.task.lock().await.take();
    if let Some(task) = task {
        let _ = task.cancel.send(true);
        if let Err(e) = task.handle.await {
            tracing::warn!(source_id = %source_id, error = %e, "Capture task join failed");
        }
    }
    slot.set_state(SourceState::Stopped).await;
}

/// The capture loop: one task per started source.
///
/// Cancellation is checked at the top of every iteration and during every
/// sleep, so shutdown latency is bounded by one frame interval.
#[allow(clippy::too_many_arguments)]
async fn run_capture(
    connector: Arc<dyn StreamConnector>,
    slot: Arc<SourceSlot>,
    source_id: String,
    stream: Box<dyn StreamHandle>,
    descriptor: StreamDescriptor,
    frame_interval: Duration,
    tuning: CaptureTuning,
    total_frames: Arc<AtomicU64>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tracing::info!(source_id = %source_id, "Capture loop running");
    let mut stream = Some(stream);

    loop {
        if *cancel_rx.borrow() {
            break;
        }
        let Some(handle) = stream.as_mut() else {
            break;
        };
        let iteration_start = Instant::now();

        match handle.read_frame().await {
            Ok(frame) => {
                let record = {
                    let mut buffer = slot.buffer.write().await;
                    buffer.push(Arc::new(frame), Utc::now())
                };
                slot.record_success(record.captured_at).await;
                total_frames.fetch_add(1, Ordering::Relaxed);

                let callbacks = slot.callbacks.read().await.clone();
                for (callback_id, callback) in callbacks {
                    if let Err(e) = callback(source_id.clone(), record.clone()).await {
                        tracing::error!(
                            source_id = %source_id,
                            callback_id = %callback_id,
                            error = %e,
                            "Frame callback failed"
                        );
                    }
                }

                let elapsed = iteration_start.elapsed();
                if frame_interval > elapsed {
                    tokio::select! {
                        _ = cancel_rx.changed() => {}
                        _ = tokio::time::sleep(frame_interval - elapsed) => {}
                    }
                }
            }
            Err(e) => {
                let errors = slot.record_read_error(&e).await;
                tracing::warn!(
                    source_id = %source_id,
                    error = %e,
                    consecutive_errors = errors,
                    "Frame read failed"
                );

                if errors > tuning.error_threshold {
                    // Sustained failure: one bounded reconnection attempt
                    slot.set_state(SourceState::Reconnecting).await;
                    if let Some(mut old) = stream.take() {
                        old.close().await;
                    }
                    tracing::info!(
                        source_id = %source_id,
                        cooldown_ms = tuning.reconnect_cooldown.as_millis() as u64,
                        "Reconnecting after sustained read failures"
                    );
                    tokio::select! {
                        _ = cancel_rx.changed() => break,
                        _ = tokio::time::sleep(tuning.reconnect_cooldown) => {}
                    }
                    if *cancel_rx.borrow() {
                        break;
                    }

                    slot.set_state(SourceState::Connecting).await;
                    match connector.open(&descriptor).await {
                        Ok(reopened) => {
                            stream = Some(reopened);
                            slot.mark_streaming().await;
                            tracing::info!(source_id = %source_id, "Source reconnected");
                        }
                        Err(reopen_err) => {
                            slot.record_failure(format!("reconnect failed: {}", reopen_err))
                                .await;
                            tracing::error!(
                                source_id = %source_id,
                                error = %reopen_err,
                                "Reconnection failed - capture loop terminating"
                            );
                            break;
                        }
                    }
                } else {
                    tokio::select! {
                        _ = cancel_rx.changed() => {}
                        _ = tokio::time::sleep(tuning.read_backoff) => {}
                    }
                }
            }
        }
    }

    if let Some(mut handle) = stream.take() {
        handle.close().await;
    }
    slot.set_state(SourceState::Stopped).await;
    tracing::info!(source_id = %source_id, "Capture loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::SyntheticConnector;
    use crate::models::Frame;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn fast_tuning() -> CaptureTuning {
        CaptureTuning {
            error_threshold: 10,
            reconnect_cooldown: Duration::from_millis(5),
            read_backoff: Duration::from_millis(1),
        }
    }

    fn test_config(source_id: &str) -> SourceConfig {
        SourceConfig::new(source_id, StreamDescriptor::new("synthetic://test"))
            .with_frame_rate(200)
            .with_resolution("32x24")
    }

    fn synthetic_manager() -> StreamManager {
        StreamManager::with_tuning(Arc::new(SyntheticConnector::new(32, 24)), 5, fast_tuning())
    }

    /// Connector whose streams fail every read; reopen attempts can be
    /// scripted to fail as well.
    struct FlakyConnector {
        opens: AtomicU32,
        fail_reopen: bool,
        reads_fail_on_first_handle_only: bool,
    }

    impl FlakyConnector {
        fn failing(fail_reopen: bool) -> Self {
            Self {
                opens: AtomicU32::new(0),
                fail_reopen,
                reads_fail_on_first_handle_only: false,
            }
        }

        fn recovering() -> Self {
            Self {
                opens: AtomicU32::new(0),
                fail_reopen: false,
                reads_fail_on_first_handle_only: true,
            }
        }

        fn open_count(&self) -> u32 {
            self.opens.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl StreamConnector for FlakyConnector {
        async fn open(&self, _descriptor: &StreamDescriptor) -> Result<Box<dyn StreamHandle>> {
            let opens = self.opens.fetch_add(1, Ordering::Relaxed) + 1;
            if opens > 1 && self.fail_reopen {
                return Err(Error::Connection("camera unreachable".to_string()));
            }
            let healthy = self.reads_fail_on_first_handle_only && opens > 1;
            Ok(Box::new(FlakyStream { healthy }))
        }
    }

    struct FlakyStream {
        healthy: bool,
    }

    #[async_trait]
    impl StreamHandle for FlakyStream {
        async fn read_frame(&mut self) -> Result<Frame> {
            if self.healthy {
                Frame::from_raw(8, 8, vec![0u8; 8 * 8 * 3])
            } else {
                Err(Error::Stream("decode failed".to_string()))
            }
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        let err = manager.add_source(test_config("cam-001")).await;
        assert!(matches!(err, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_remove_unknown_source() {
        let manager = synthetic_manager();
        let err = manager.remove_source("nope").await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_start_disabled_source_is_rejected() {
        let manager = synthetic_manager();
        let mut config = test_config("cam-001");
        config.enabled = false;
        manager.add_source(config).await.unwrap();

        let err = manager.start_source("cam-001").await;
        assert!(matches!(err, Err(Error::Validation(_))));
        let status = manager.status("cam-001").await.unwrap();
        assert_eq!(status.state, SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_capture_fills_buffer_within_capacity() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = manager.status("cam-001").await.unwrap();
        assert_eq!(status.state, SourceState::Streaming);
        assert!(status.frame_count > 2);
        assert!(status.buffered_frames <= 5);
        assert!(manager.latest_frame("cam-001").await.unwrap().is_some());

        manager.stop_source("cam-001").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();

        manager.stop_source("cam-001").await.unwrap();
        let first = manager.status("cam-001").await.unwrap();
        assert_eq!(first.state, SourceState::Stopped);

        // Second stop observes the same state without error
        manager.stop_source("cam-001").await.unwrap();
        let second = manager.status("cam-001").await.unwrap();
        assert_eq!(second.state, SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_reconnect_leaves_source_stopped() {
        let connector = Arc::new(FlakyConnector::failing(true));
        let manager =
            StreamManager::with_tuning(connector.clone(), 5, fast_tuning());
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        // Exactly one reconnection attempt: initial open + one reopen
        assert_eq!(connector.open_count(), 2);
        let status = manager.status("cam-001").await.unwrap();
        assert_eq!(status.state, SourceState::Stopped);
        assert!(status.last_error.is_some());
        assert!(status.error_count > 10);
    }

    #[tokio::test]
    async fn test_successful_reconnect_resumes_streaming() {
        let connector = Arc::new(FlakyConnector::recovering());
        let manager =
            StreamManager::with_tuning(connector.clone(), 5, fast_tuning());
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(connector.open_count(), 2);
        let status = manager.status("cam-001").await.unwrap();
        assert_eq!(status.state, SourceState::Streaming);
        assert_eq!(status.error_count, 0);
        assert!(status.frame_count > 0);

        manager.stop_source("cam-001").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_block_capture() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();

        let invocations = Arc::new(AtomicU32::new(0));
        let seen = invocations.clone();
        let failing: FrameCallback = Arc::new(
            move |_: String, _: FrameRecord| -> BoxFuture<'static, Result<()>> {
                let seen = seen.clone();
                Box::pin(async move {
                    seen.fetch_add(1, Ordering::Relaxed);
                    Err(Error::Internal("callback exploded".to_string()))
                })
            },
        );
        manager
            .register_frame_callback("cam-001", failing)
            .await
            .unwrap();

        manager.start_source("cam-001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.stop_source("cam-001").await.unwrap();

        let status = manager.status("cam-001").await.unwrap();
        assert!(status.frame_count >= 2, "capture must survive callback failures");
        assert!(status.buffered_frames > 0);
        assert!(invocations.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn test_callbacks_run_in_registration_order() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            let callback: FrameCallback = Arc::new(
                move |_: String, record: FrameRecord| -> BoxFuture<'static, Result<()>> {
                    let order = order.clone();
                    Box::pin(async move {
                        order.lock().await.push((tag, record.sequence));
                        Ok(())
                    })
                },
            );
            manager
                .register_frame_callback("cam-001", callback)
                .await
                .unwrap();
        }

        manager.start_source("cam-001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.stop_source("cam-001").await.unwrap();

        let order = order.lock().await;
        assert!(order.len() >= 2);
        // For each frame, "first" precedes "second"
        for pair in order.chunks_exact(2) {
            assert_eq!(pair[0].0, "first");
            assert_eq!(pair[1].0, "second");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[tokio::test]
    async fn test_remove_callback() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();

        let noop: FrameCallback = Arc::new(
            |_: String, _: FrameRecord| -> BoxFuture<'static, Result<()>> {
                Box::pin(async { Ok(()) })
            },
        );
        let id = manager
            .register_frame_callback("cam-001", noop)
            .await
            .unwrap();
        manager.remove_frame_callback("cam-001", id).await.unwrap();
        let err = manager.remove_frame_callback("cam-001", id).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_source_drops_state() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.remove_source("cam-001").await.unwrap();
        assert!(matches!(
            manager.status("cam-001").await,
            Err(Error::NotFound(_))
        ));
        assert!(manager.source_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_jpeg() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.start_source("cam-001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.stop_source("cam-001").await.unwrap();

        let snapshot = manager
            .capture_snapshot("cam-001")
            .await
            .unwrap()
            .expect("snapshot after streaming");
        assert_eq!(&snapshot.data[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_stats_aggregate() {
        let manager = synthetic_manager();
        manager.add_source(test_config("cam-001")).await.unwrap();
        manager.add_source(test_config("cam-002")).await.unwrap();
        manager.start_all_sources().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = manager.stats().await;
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.streaming_sources, 2);
        assert!(stats.total_frames_captured > 0);

        manager.stop_all_sources().await;
        let stats = manager.stats().await;
        assert_eq!(stats.streaming_sources, 0);
    }
}
