//! # Sharpness Scoring
//!
//! Blur detection for captured document frames.
//!
//! ### Laplacian Variance
//! - Measures high-frequency content (edges, printed text)
//! - A flat frame scores 0; motion blur and defocus drive the score down
//! - Evaluated at every pixel with reflect-101 borders, so small ROI crops
//!   still produce a score
//!
//! ### Burst Selection
//! - A burst of captures is scored in parallel and the sharpest one is kept
//! - Scoring can cover the whole frame or only the guide rectangle
//!   (see [`SharpnessScope`])

use image::GrayImage;
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{QualityError, QualityResult};
use crate::frame::Frame;
use crate::region::RoiSpec;

/// Calculates the sharpness of a frame using the Laplacian variance method.
/// Higher values indicate sharper images.
pub fn calculate_sharpness(frame: &Frame) -> QualityResult<f64> {
    let gray = frame.luma();
    laplacian_variance(&gray)
}

/// Computes the population variance of the Laplacian of a grayscale image.
pub fn laplacian_variance(img: &GrayImage) -> QualityResult<f64> {
    let (width, height) = img.dimensions();

    if width == 0 || height == 0 {
        return Err(QualityError::InvalidFrame(format!(
            "cannot take the Laplacian of a {}x{} image",
            width, height
        )));
    }

    let w = width as i64;
    let h = height as i64;
    let at = |x: i64, y: i64| -> i64 {
        img.get_pixel(reflect_101(x, w) as u32, reflect_101(y, h) as u32)[0] as i64
    };

    // Apply Laplacian kernel (using 3x3 kernel)
    // [ 0  1  0 ]
    // [ 1 -4  1 ]
    // [ 0  1  0 ]
    let count = (w * h) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let laplacian =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4 * at(x, y);
            let value = laplacian as f64;
            sum += value;
            sum_sq += value * value;
        }
    }

    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0);
    Ok(variance)
}

/// Mirrors an out-of-range index back into `0..len` without repeating the
/// edge sample (`-1 -> 1`, `len -> len - 2`).
fn reflect_101(i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    if i < 0 {
        -i
    } else if i >= len {
        2 * (len - 1) - i
    } else {
        i
    }
}

/// Which pixels of a captured frame contribute to its sharpness score.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SharpnessScope {
    /// Whole frame.
    #[default]
    Global,
    /// Only the guide rectangle, given in display coordinates and mapped into
    /// each frame's own pixel grid.
    Roi(RoiSpec),
}

impl SharpnessScope {
    pub fn score(&self, frame: &Frame) -> QualityResult<f64> {
        match self {
            SharpnessScope::Global => calculate_sharpness(frame),
            SharpnessScope::Roi(roi) => calculate_sharpness(&roi.extract(frame)?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpestPick {
    pub index: usize,
    pub sharpness: f64,
}

/// Scores every frame in parallel and returns the sharpest one. Frames that
/// cannot be scored are skipped; ties keep the earliest frame.
pub fn select_sharpest(frames: &[Frame], scope: &SharpnessScope) -> Option<SharpestPick> {
    let scores: Vec<(usize, f64)> = frames
        .par_iter()
        .enumerate()
        .filter_map(|(index, frame)| match scope.score(frame) {
            Ok(sharpness) => Some((index, sharpness)),
            Err(err) => {
                warn!("skipping frame {} in sharpness ranking: {}", index, err);
                None
            }
        })
        .collect();

    let mut best: Option<SharpestPick> = None;
    for (index, sharpness) in scores {
        match best {
            Some(current) if current.sharpness >= sharpness => {}
            _ => best = Some(SharpestPick { index, sharpness }),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{BoundsMode, Rect, Size};

    fn checkerboard(size: u32, cell: u32) -> Frame {
        let mut data = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let on = ((x / cell) + (y / cell)) % 2 == 0;
                data.push(if on { 220 } else { 30 });
            }
        }
        Frame::gray(size, size, data, 0).unwrap()
    }

    fn box_blur(frame: &Frame) -> Frame {
        let gray = frame.luma();
        let (w, h) = gray.dimensions();
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let mut acc = 0u32;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let sx = (x + dx).clamp(0, w as i64 - 1) as u32;
                        let sy = (y + dy).clamp(0, h as i64 - 1) as u32;
                        acc += gray.get_pixel(sx, sy)[0] as u32;
                    }
                }
                data.push((acc / 9) as u8);
            }
        }
        Frame::gray(w, h, data, 0).unwrap()
    }

    #[test]
    fn test_flat_frame_has_zero_sharpness() {
        let frame = Frame::uniform(32, 32, 128, 0).unwrap();
        assert_eq!(calculate_sharpness(&frame).unwrap(), 0.0);
    }

    #[test]
    fn test_single_pixel_frame_is_scored() {
        let frame = Frame::uniform(1, 1, 77, 0).unwrap();
        assert_eq!(calculate_sharpness(&frame).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_gray_image_is_invalid() {
        let img = GrayImage::new(0, 0);
        assert!(matches!(
            laplacian_variance(&img),
            Err(QualityError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_checkerboard_sharper_than_blurred() {
        let sharp = checkerboard(40, 1);
        let blurred = box_blur(&sharp);
        let sharp_score = calculate_sharpness(&sharp).unwrap();
        let blurred_score = calculate_sharpness(&blurred).unwrap();
        assert!(sharp_score > blurred_score);
        assert!(blurred_score >= 0.0);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    #[test]
    fn test_select_sharpest_picks_highest() {
        let sharp = checkerboard(24, 2);
        let frames = vec![
            Frame::uniform(24, 24, 100, 0).unwrap(),
            box_blur(&sharp),
            sharp,
        ];
        let pick = select_sharpest(&frames, &SharpnessScope::Global).unwrap();
        assert_eq!(pick.index, 2);
        assert!(pick.sharpness > 0.0);
    }

    #[test]
    fn test_default_scope_is_global() {
        assert_eq!(SharpnessScope::default(), SharpnessScope::Global);
        let parsed: SharpnessScope = serde_json::from_str(r#"{"kind":"global"}"#).unwrap();
        assert_eq!(parsed, SharpnessScope::default());
    }

    #[test]
    fn test_select_sharpest_ties_keep_first() {
        let frames = vec![
            Frame::uniform(8, 8, 10, 0).unwrap(),
            Frame::uniform(8, 8, 200, 0).unwrap(),
        ];
        let pick = select_sharpest(&frames, &SharpnessScope::Global).unwrap();
        assert_eq!(pick.index, 0);
        assert!(select_sharpest(&[], &SharpnessScope::Global).is_none());
    }

    #[test]
    fn test_roi_scope_ignores_outside_detail() {
        // Left half is a checkerboard, right half flat.
        let mut data = Vec::new();
        for y in 0..20u32 {
            for x in 0..40u32 {
                let v = if x < 20 && (x + y) % 2 == 0 { 255 } else { 0 };
                data.push(v);
            }
        }
        let frame = Frame::gray(40, 20, data, 0).unwrap();
        let scope = SharpnessScope::Roi(RoiSpec::new(
            Rect::new(30, 5, 8, 10),
            Size::new(40, 20),
            BoundsMode::Strict,
        ));
        assert_eq!(scope.score(&frame).unwrap(), 0.0);
        assert!(SharpnessScope::Global.score(&frame).unwrap() > 0.0);
    }
}
