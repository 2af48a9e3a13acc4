//! Per-frame quality metrics.
//!
//! All intensities are 8-bit grayscale: brightness is the raw mean in
//! `[0, 255]`, glare is reported both as a percentage of pixels above the
//! glare threshold and as the summed area of large bright blobs.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{QualityError, QualityResult};
use crate::frame::Frame;
use crate::sharpness::laplacian_variance;

pub const DEFAULT_GLARE_THRESHOLD: u8 = 240;
pub const DEFAULT_MIN_GLARE_COMPONENT_AREA: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfig {
    /// Pixels strictly brighter than this count as glare.
    pub glare_threshold: u8,
    /// Bright blobs smaller than this (in pixels) are ignored by `glare_area`.
    pub min_glare_component_area: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            glare_threshold: DEFAULT_GLARE_THRESHOLD,
            min_glare_component_area: DEFAULT_MIN_GLARE_COMPONENT_AREA,
        }
    }
}

/// Quality metrics of one frame. Produced fresh per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Mean grayscale intensity, `[0, 255]`.
    pub brightness: f64,
    /// Percent of pixels above the glare threshold, `[0, 100]`.
    pub glare_percentage: f64,
    /// Pixel count of 8-connected glare blobs of at least the minimum area.
    pub glare_area: f64,
    /// Variance of the Laplacian.
    pub sharpness: f64,
    /// Standard deviation of grayscale intensity.
    pub contrast: f64,
    /// Mean / standard deviation, 0 for a flat frame.
    pub noise_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrayStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Mean and population standard deviation of a grayscale image.
pub fn gray_stats(img: &GrayImage) -> QualityResult<GrayStats> {
    let pixels = img.as_raw();
    if pixels.is_empty() {
        return Err(QualityError::InvalidFrame(
            "cannot compute statistics of an empty image".to_string(),
        ));
    }

    let mut hist = [0u64; 256];
    for &p in pixels.iter() {
        hist[p as usize] += 1;
    }

    let count = pixels.len() as f64;
    let mut sum = 0.0;
    for (value, &n) in hist.iter().enumerate() {
        sum += value as f64 * n as f64;
    }
    let mean = sum / count;

    let mut sq = 0.0;
    for (value, &n) in hist.iter().enumerate() {
        if n > 0 {
            let d = value as f64 - mean;
            sq += d * d * n as f64;
        }
    }
    let std_dev = (sq / count).sqrt();

    Ok(GrayStats { mean, std_dev })
}

pub fn brightness(frame: &Frame) -> QualityResult<f64> {
    Ok(gray_stats(&frame.luma())?.mean)
}

pub fn contrast(frame: &Frame) -> QualityResult<f64> {
    Ok(gray_stats(&frame.luma())?.std_dev)
}

pub fn noise_ratio(frame: &Frame) -> QualityResult<f64> {
    Ok(ratio(&gray_stats(&frame.luma())?))
}

fn ratio(stats: &GrayStats) -> f64 {
    if stats.std_dev > 0.0 {
        stats.mean / stats.std_dev
    } else {
        0.0
    }
}

pub fn glare_percentage(frame: &Frame, threshold: u8) -> QualityResult<f64> {
    gray_glare_percentage(&frame.luma(), threshold)
}

pub fn glare_area(frame: &Frame, threshold: u8, min_component_area: u32) -> QualityResult<f64> {
    gray_glare_area(&frame.luma(), threshold, min_component_area)
}

fn gray_glare_percentage(img: &GrayImage, threshold: u8) -> QualityResult<f64> {
    let pixels = img.as_raw();
    if pixels.is_empty() {
        return Err(QualityError::InvalidFrame(
            "cannot measure glare of an empty image".to_string(),
        ));
    }
    let bright = pixels.iter().filter(|&&p| p > threshold).count();
    Ok(bright as f64 * 100.0 / pixels.len() as f64)
}

/// Labels 8-connected components of the thresholded image and sums the sizes
/// of those with at least `min_component_area` pixels.
fn gray_glare_area(img: &GrayImage, threshold: u8, min_component_area: u32) -> QualityResult<f64> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(QualityError::InvalidFrame(
            "cannot measure glare of an empty image".to_string(),
        ));
    }

    let w = width as usize;
    let h = height as usize;
    let pixels = img.as_raw();
    let mut visited = vec![false; w * h];
    let mut stack: Vec<usize> = Vec::new();
    let mut total: u64 = 0;

    for start in 0..w * h {
        if visited[start] || pixels[start] <= threshold {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let mut size: u64 = 0;

        while let Some(idx) = stack.pop() {
            size += 1;
            let x = idx % w;
            let y = idx / w;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let n = ny as usize * w + nx as usize;
                    if !visited[n] && pixels[n] > threshold {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if size >= min_component_area as u64 {
            total += size;
        }
    }

    Ok(total as f64)
}

/// Computes every metric from a single grayscale conversion.
pub fn compute_metrics(frame: &Frame, config: &MetricsConfig) -> QualityResult<Metrics> {
    let gray = frame.luma();
    let stats = gray_stats(&gray)?;

    Ok(Metrics {
        brightness: stats.mean,
        glare_percentage: gray_glare_percentage(&gray, config.glare_threshold)?,
        glare_area: gray_glare_area(&gray, config.glare_threshold, config.min_glare_component_area)?,
        sharpness: laplacian_variance(&gray)?,
        contrast: stats.std_dev,
        noise_ratio: ratio(&stats),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_bright_square(size: u32, square: u32, base: u8) -> Frame {
        let mut data = vec![base; (size * size) as usize];
        for y in 0..square {
            for x in 0..square {
                data[(y * size + x) as usize] = 255;
            }
        }
        Frame::gray(size, size, data, 0).unwrap()
    }

    #[test]
    fn test_uniform_frame_metrics() {
        for v in [0u8, 20, 120, 255] {
            let frame = Frame::uniform(16, 9, v, 0).unwrap();
            assert_eq!(brightness(&frame).unwrap(), v as f64);
            assert_eq!(contrast(&frame).unwrap(), 0.0);
            assert_eq!(noise_ratio(&frame).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_brightness_in_range() {
        let data: Vec<u8> = (0..=255).collect();
        let frame = Frame::gray(16, 16, data, 0).unwrap();
        let b = brightness(&frame).unwrap();
        assert!((0.0..=255.0).contains(&b));
        assert!((b - 127.5).abs() < 1e-9);
    }

    #[test]
    fn test_noise_ratio_is_mean_over_std() {
        let frame = Frame::gray(2, 1, vec![100, 200], 0).unwrap();
        assert!((contrast(&frame).unwrap() - 50.0).abs() < 1e-9);
        assert!((noise_ratio(&frame).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_glare_percentage() {
        let frame = with_bright_square(10, 5, 100);
        assert!((glare_percentage(&frame, 240).unwrap() - 25.0).abs() < 1e-9);
        assert_eq!(glare_percentage(&frame, 255).unwrap(), 0.0);
    }

    #[test]
    fn test_glare_area_filters_small_blobs() {
        let frame = with_bright_square(40, 12, 50);
        assert_eq!(glare_area(&frame, 240, 100).unwrap(), 144.0);
        assert_eq!(glare_area(&frame, 240, 145).unwrap(), 0.0);

        let small = with_bright_square(40, 5, 50);
        assert_eq!(glare_area(&small, 240, 100).unwrap(), 0.0);
    }

    #[test]
    fn test_glare_area_joins_diagonal_neighbours() {
        // A diagonal line is one 8-connected component.
        let mut data = vec![0u8; 20 * 20];
        for i in 0..20 {
            data[i * 20 + i] = 250;
        }
        let frame = Frame::gray(20, 20, data, 0).unwrap();
        assert_eq!(glare_area(&frame, 240, 20).unwrap(), 20.0);
    }

    #[test]
    fn test_compute_metrics() {
        let frame = with_bright_square(20, 10, 120);
        let metrics = compute_metrics(&frame, &MetricsConfig::default()).unwrap();
        assert!((metrics.glare_percentage - 25.0).abs() < 1e-9);
        assert_eq!(metrics.glare_area, 100.0);
        assert!(metrics.brightness > 120.0);
        assert!(metrics.contrast > 0.0);
        assert!(metrics.sharpness > 0.0);
        assert!(metrics.noise_ratio.is_finite());
    }

    #[test]
    fn test_empty_image_is_invalid() {
        assert!(matches!(
            gray_stats(&GrayImage::new(0, 3)),
            Err(QualityError::InvalidFrame(_))
        ));
    }
}
