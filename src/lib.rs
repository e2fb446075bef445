//! Argos Engine
//!
//! Real-time multi-source capture-and-detection orchestration.
//!
//! ## Architecture (8 Components)
//!
//! 1. StreamManager - source registry, capture loops, frame buffering
//! 2. DetectionPipeline - per-source detection scheduling and fusion
//! 3. AnomalyDetector - multi-signal anomaly scoring
//! 4. Connector - stream open/read/close collaborator contract
//! 5. Inference - detection/anomaly model contracts + remote adapter
//! 6. ResultSink - downstream delivery boundary
//! 7. FrameOps - pixel-level helpers (diff, preprocess, features, JPEG)
//! 8. Config - environment-driven engine configuration
//!
//! ## Design Principles
//!
//! - One lightweight task per source per role (capture, detection)
//! - Per-source state sharding: unrelated sources never contend
//! - Lossy backpressure: oldest-frame eviction, producers never block
//! - Partial failure tolerance: a failing source or signal never takes
//!   down the engine

pub mod anomaly_detector;
pub mod config;
pub mod connector;
pub mod detection_pipeline;
pub mod error;
pub mod frame_ops;
pub mod inference;
pub mod models;
pub mod result_sink;
pub mod stream_manager;

pub use error::{Error, Result};
