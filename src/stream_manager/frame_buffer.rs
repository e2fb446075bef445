//! Bounded per-source frame buffer
//!
//! Fixed-capacity FIFO with most-recent-wins eviction: on overflow the
//! oldest record is dropped so downstream consumers never block the
//! capture loop.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::{Frame, FrameRecord};

/// Ring buffer of recent frames for one source
pub struct FrameBuffer {
    frames: VecDeque<FrameRecord>,
    capacity: usize,
    next_sequence: u64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
        }
    }

    /// Push a frame, evicting the oldest record if full. Returns the stored
    /// record (cheap clone, pixel data is shared).
    pub fn push(&mut self, frame: Arc<Frame>, captured_at: DateTime<Utc>) -> FrameRecord {
        let record = FrameRecord {
            frame,
            captured_at,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(record.clone());
        record
    }

    /// Most recent record, if any
    pub fn latest(&self) -> Option<FrameRecord> {
        self.frames.back().cloned()
    }

    /// Last `count` records in capture order
    pub fn history(&self, count: usize) -> Vec<FrameRecord> {
        let skip = self.frames.len().saturating_sub(count);
        self.frames.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::from_raw(4, 4, vec![0u8; 4 * 4 * 3]).unwrap())
    }

    #[test]
    fn test_push_assigns_monotonic_sequence() {
        let mut buffer = FrameBuffer::new(4);
        let first = buffer.push(frame(), Utc::now());
        let second = buffer.push(frame(), Utc::now());
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let mut buffer = FrameBuffer::new(3);
        for _ in 0..4 {
            buffer.push(frame(), Utc::now());
        }

        assert_eq!(buffer.len(), 3);
        let history = buffer.history(10);
        let sequences: Vec<u64> = history.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut buffer = FrameBuffer::new(5);
        for _ in 0..50 {
            buffer.push(frame(), Utc::now());
            assert!(buffer.len() <= buffer.capacity());
        }
    }

    #[test]
    fn test_latest_is_newest() {
        let mut buffer = FrameBuffer::new(3);
        buffer.push(frame(), Utc::now());
        let last = buffer.push(frame(), Utc::now());
        assert_eq!(buffer.latest().map(|r| r.sequence), Some(last.sequence));
    }

    #[test]
    fn test_history_subset() {
        let mut buffer = FrameBuffer::new(5);
        for _ in 0..5 {
            buffer.push(frame(), Utc::now());
        }
        let last_two = buffer.history(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].sequence, 4);
        assert_eq!(last_two[1].sequence, 5);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = FrameBuffer::new(3);
        assert!(buffer.latest().is_none());
        assert!(buffer.history(2).is_empty());
        assert!(buffer.is_empty());
    }
}
