//! Argos Engine daemon
//!
//! Main entry point: wires the engine components together and runs until
//! interrupted.

use argos_engine::{
    anomaly_detector::{AnomalyDetector, AnomalyModels},
    config::{parse_resolution, EngineConfig},
    connector::{StreamDescriptor, SyntheticConnector},
    detection_pipeline::DetectionPipeline,
    inference::{ModelSet, RemoteDetector},
    result_sink::MemoryResultSink,
    stream_manager::{SourceConfig, StreamManager},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argos_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Argos engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::default();
    tracing::info!(
        frame_rate = config.frame_rate,
        resolution = %config.resolution,
        buffer_size = config.buffer_size,
        processing_interval_ms = config.processing_interval.as_millis() as u64,
        anomaly_threshold = config.anomaly_threshold,
        sources = config.sources.len(),
        "Configuration loaded"
    );

    // Synthetic connector stands in for a real transport; swap in an RTSP
    // connector crate behind the same trait for production capture.
    let (width, height) = parse_resolution(&config.resolution);
    let connector = Arc::new(SyntheticConnector::new(width, height));
    let streams = Arc::new(StreamManager::new(connector, config.buffer_size));

    let mut models = ModelSet::default();
    if let Some(url) = &config.inference_url {
        let remote = Arc::new(RemoteDetector::new(url.clone()));
        models.object_detector = Some(remote.clone());
        models.face_detector = Some(remote);
        tracing::info!(inference_url = %url, "Remote inference enabled");
    } else {
        tracing::info!("No inference endpoint configured - detection runs on motion/anomaly signals only");
    }

    let anomaly = Arc::new(AnomalyDetector::new(
        AnomalyModels::default(),
        config.anomaly_threshold,
    ));
    let sink = Arc::new(MemoryResultSink::default());

    let pipeline = DetectionPipeline::new(
        streams,
        anomaly,
        models,
        sink.clone(),
        config.processing_interval,
    );

    for (source_id, uri) in &config.sources {
        let source = SourceConfig::new(source_id.as_str(), StreamDescriptor::new(uri.as_str()))
            .with_frame_rate(config.frame_rate)
            .with_resolution(config.resolution.clone());
        pipeline.add_source(source).await?;
    }

    pipeline.start().await;
    tracing::info!("Detection pipeline running - press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    pipeline.stop().await;

    let status = pipeline.status().await;
    tracing::info!(
        total_detections = status.total_detections,
        total_anomalies = status.total_anomalies,
        total_objects = status.total_objects,
        buffered_results = sink.count().await,
        "Engine stopped"
    );

    Ok(())
}
