use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{QualityError, QualityResult};
use crate::frame::Frame;
use crate::metrics::{compute_metrics, Metrics, MetricsConfig};
use crate::region::RoiSpec;

/// Result of scoring one image file. Failures are reported per file so one
/// unreadable image does not sink the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub path: String,
    pub metrics: Option<Metrics>,
    pub error: Option<String>,
}

/// Scores a frame, restricted to the ROI when one is given.
pub fn analyze_frame(
    frame: &Frame,
    config: &MetricsConfig,
    roi: Option<&RoiSpec>,
) -> QualityResult<Metrics> {
    match roi {
        Some(roi) => compute_metrics(&roi.extract(frame)?, config),
        None => compute_metrics(frame, config),
    }
}

/// One-shot quality scoring of an encoded image (JPEG, PNG, ...), with the
/// default metric settings over the whole image.
pub fn analyze_image(bytes: &[u8]) -> QualityResult<Metrics> {
    analyze_image_with(bytes, &MetricsConfig::default(), None)
}

pub fn analyze_image_with(
    bytes: &[u8],
    config: &MetricsConfig,
    roi: Option<&RoiSpec>,
) -> QualityResult<Metrics> {
    let frame = decode(bytes)?;
    analyze_frame(&frame, config, roi)
}

/// Same as [`analyze_image`] for base64 payloads. A `data:image/...;base64,`
/// prefix is accepted.
pub fn analyze_image_base64(encoded: &str) -> QualityResult<Metrics> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = general_purpose::STANDARD.decode(payload.trim())?;
    analyze_image(&bytes)
}

pub fn analyze_file(
    path: &Path,
    config: &MetricsConfig,
    roi: Option<&RoiSpec>,
) -> QualityResult<Metrics> {
    let bytes = std::fs::read(path)?;
    debug!("scoring {} ({} bytes)", path.display(), bytes.len());
    analyze_image_with(&bytes, config, roi)
}

/// Scores many files in parallel on a pool of `threads` workers (all cores
/// when `None`).
pub fn analyze_files(
    paths: &[PathBuf],
    config: &MetricsConfig,
    roi: Option<&RoiSpec>,
    threads: Option<usize>,
) -> Vec<AnalysisResult> {
    let run = || -> Vec<AnalysisResult> {
        paths
            .par_iter()
            .map(|path| match analyze_file(path, config, roi) {
                Ok(metrics) => AnalysisResult {
                    path: path.display().to_string(),
                    metrics: Some(metrics),
                    error: None,
                },
                Err(err) => AnalysisResult {
                    path: path.display().to_string(),
                    metrics: None,
                    error: Some(err.to_string()),
                },
            })
            .collect()
    };

    let threads = threads.unwrap_or_else(num_cpus::get).max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(run),
        Err(err) => {
            warn!("falling back to the global rayon pool: {}", err);
            run()
        }
    }
}

fn decode(bytes: &[u8]) -> QualityResult<Frame> {
    if bytes.is_empty() {
        return Err(QualityError::DecodeFailure("empty image buffer".to_string()));
    }
    let img = image::load_from_memory(bytes)?;
    Frame::from_image(img, 0)
}
