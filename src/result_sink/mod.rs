//! Result sink - downstream delivery boundary
//!
//! ## Responsibilities
//!
//! - Define the fire-and-forget `publish` contract for fused results
//! - Provide an in-memory ring-buffer sink for demos and tests
//!
//! The orchestrator never retries a failed publish; retry/backpressure is
//! the sink's own responsibility.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::DetectionResult;

/// Receives fused detection results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: &DetectionResult) -> Result<()>;
}

/// Ring buffer for results
struct ResultRingBuffer {
    results: VecDeque<DetectionResult>,
    capacity: usize,
}

impl ResultRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            results: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, result: DetectionResult) {
        if self.results.len() >= self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result);
    }

    fn latest(&self, count: usize) -> Vec<DetectionResult> {
        self.results.iter().rev().take(count).cloned().collect()
    }

    fn by_source(&self, source_id: &str, count: usize) -> Vec<DetectionResult> {
        self.results
            .iter()
            .rev()
            .filter(|r| r.source_id == source_id)
            .take(count)
            .cloned()
            .collect()
    }
}

/// In-memory result sink
pub struct MemoryResultSink {
    buffer: RwLock<ResultRingBuffer>,
}

impl MemoryResultSink {
    /// Create new MemoryResultSink
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(ResultRingBuffer::new(capacity)),
        }
    }

    /// Get latest results (newest first)
    pub async fn latest(&self, count: usize) -> Vec<DetectionResult> {
        self.buffer.read().await.latest(count)
    }

    /// Get results for one source (newest first)
    pub async fn by_source(&self, source_id: &str, count: usize) -> Vec<DetectionResult> {
        self.buffer.read().await.by_source(source_id, count)
    }

    /// Get stored result count
    pub async fn count(&self) -> usize {
        self.buffer.read().await.results.len()
    }
}

impl Default for MemoryResultSink {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn publish(&self, result: &DetectionResult) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        buffer.push(result.clone());
        tracing::debug!(
            source_id = %result.source_id,
            risk = ?result.risk_level,
            "Result published to memory sink"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyAssessment, DetectionResult, MotionAnalysis};
    use chrono::Utc;

    fn result(source_id: &str) -> DetectionResult {
        DetectionResult::fuse(
            source_id,
            Utc::now(),
            vec![],
            vec![],
            MotionAnalysis {
                has_motion: true,
                motion_fraction: 0.1,
                changed_pixels: 100,
            },
            AnomalyAssessment::default(),
        )
    }

    #[tokio::test]
    async fn test_publish_and_query() {
        let sink = MemoryResultSink::new(10);
        sink.publish(&result("cam-001")).await.unwrap();
        sink.publish(&result("cam-002")).await.unwrap();

        assert_eq!(sink.count().await, 2);
        assert_eq!(sink.latest(10).await.len(), 2);
        assert_eq!(sink.by_source("cam-001", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let sink = MemoryResultSink::new(3);
        for i in 0..5 {
            sink.publish(&result(&format!("cam-{i:03}"))).await.unwrap();
        }

        assert_eq!(sink.count().await, 3);
        let latest = sink.latest(3).await;
        assert_eq!(latest[0].source_id, "cam-004");
        assert!(sink.by_source("cam-000", 10).await.is_empty());
    }
}
