//! Pixel-level frame operations
//!
//! ## Responsibilities
//!
//! - Grayscale conversion and frame differencing for motion analysis
//! - Preprocessing (resize + normalize) for anomaly scoring
//! - Feature extraction for sequence/attention models
//! - JPEG encoding for snapshots and inference offload

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::error::Result;
use crate::models::Frame;

/// Side length frames are resized to before anomaly scoring
pub const PREPROCESS_SIZE: u32 = 192;
/// Per-frame feature vector length: 4 stats x 3 channels + 2 grayscale stats
pub const FEATURE_DIM: usize = 14;
/// Per-pixel difference below this is treated as sensor noise
pub const DIFF_PIXEL_THRESHOLD: u8 = 30;
/// JPEG quality for snapshot encoding
const SNAPSHOT_JPEG_QUALITY: u8 = 95;

/// A frame resized to `PREPROCESS_SIZE` and normalized to [0, 1],
/// laid out channel-major (CHW)
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    pub data: Vec<f32>,
}

impl PreprocessedFrame {
    fn channel(&self, index: usize) -> &[f32] {
        let size = (PREPROCESS_SIZE * PREPROCESS_SIZE) as usize;
        &self.data[index * size..(index + 1) * size]
    }
}

/// Convert a frame to grayscale
pub fn to_gray(frame: &Frame) -> GrayImage {
    imageops::grayscale(frame.pixels())
}

/// Fraction of pixels whose grayscale difference exceeds the noise threshold.
///
/// Returns (fraction, changed pixel count). Mismatched dimensions yield no
/// motion rather than a partial comparison.
pub fn motion_fraction(current: &GrayImage, previous: &GrayImage) -> (f32, u64) {
    if current.dimensions() != previous.dimensions() {
        return (0.0, 0);
    }
    let total = current.as_raw().len();
    if total == 0 {
        return (0.0, 0);
    }

    let changed = current
        .as_raw()
        .iter()
        .zip(previous.as_raw().iter())
        .filter(|(cur, prev)| cur.abs_diff(**prev) > DIFF_PIXEL_THRESHOLD)
        .count() as u64;

    (changed as f32 / total as f32, changed)
}

/// Resize to `PREPROCESS_SIZE` square and normalize to [0, 1] CHW floats
pub fn preprocess(frame: &Frame) -> PreprocessedFrame {
    let resized = imageops::resize(
        frame.pixels(),
        PREPROCESS_SIZE,
        PREPROCESS_SIZE,
        FilterType::Triangle,
    );

    let size = (PREPROCESS_SIZE * PREPROCESS_SIZE) as usize;
    let mut data = vec![0.0_f32; size * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        data[i] = pixel.0[0] as f32 / 255.0;
        data[size + i] = pixel.0[1] as f32 / 255.0;
        data[2 * size + i] = pixel.0[2] as f32 / 255.0;
    }

    PreprocessedFrame { data }
}

/// Fraction of preprocessed pixels whose grayscale difference exceeds the
/// (normalized) noise threshold
pub fn preprocessed_motion_fraction(
    current: &PreprocessedFrame,
    previous: &PreprocessedFrame,
) -> f32 {
    let size = (PREPROCESS_SIZE * PREPROCESS_SIZE) as usize;
    let threshold = DIFF_PIXEL_THRESHOLD as f32 / 255.0;

    let changed = (0..size)
        .filter(|&i| {
            let cur = (current.channel(0)[i] + current.channel(1)[i] + current.channel(2)[i]) / 3.0;
            let prev =
                (previous.channel(0)[i] + previous.channel(1)[i] + previous.channel(2)[i]) / 3.0;
            (cur - prev).abs() > threshold
        })
        .count();

    changed as f32 / size as f32
}

/// Extract the fixed-size feature vector used by sequence/attention models:
/// per-channel mean/std/min/max plus grayscale mean/std
pub fn extract_features(frame: &PreprocessedFrame) -> Vec<f32> {
    let size = (PREPROCESS_SIZE * PREPROCESS_SIZE) as usize;
    let mut features = Vec::with_capacity(FEATURE_DIM);

    for channel in 0..3 {
        let data = frame.channel(channel);
        let (mean, std) = mean_std(data);
        let min = data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        features.extend([mean, std, min, max]);
    }

    let gray: Vec<f32> = (0..size)
        .map(|i| (frame.channel(0)[i] + frame.channel(1)[i] + frame.channel(2)[i]) / 3.0)
        .collect();
    let (gray_mean, gray_std) = mean_std(&gray);
    features.extend([gray_mean, gray_std]);

    features
}

/// Mean squared error between two preprocessed frames
pub fn reconstruction_error(original: &PreprocessedFrame, reconstructed: &PreprocessedFrame) -> f32 {
    let len = original.data.len().min(reconstructed.data.len());
    if len == 0 {
        return 0.0;
    }
    let sum: f32 = original
        .data
        .iter()
        .zip(reconstructed.data.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    sum / len as f32
}

/// Encode a frame as JPEG bytes
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, SNAPSHOT_JPEG_QUALITY);
    encoder.encode_image(frame.pixels())?;
    Ok(buffer)
}

fn mean_std(data: &[f32]) -> (f32, f32) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f32;
    let mean = data.iter().sum::<f32>() / n;
    let variance = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, variance.max(0.0).sqrt())
}
