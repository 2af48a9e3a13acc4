//! Region-of-interest mapping between the on-screen guide overlay and the
//! pixel grid of a captured frame.
//!
//! Display and frame coordinates are different unit systems. [`Rect`] carries
//! its space as a type parameter so the two cannot be mixed without going
//! through [`map_to_frame`].

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::{QualityError, QualityResult};
use crate::frame::Frame;

/// Width / height of an ID-1 card (85.60 x 53.98 mm).
pub const ID_CARD_ASPECT_RATIO: f64 = 1.59;

/// Coordinates of the preview surface the overlay is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySpace;

/// Pixel coordinates of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned integer rectangle in coordinate space `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Rect<S> {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S> Rect<S> {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            space: PhantomData,
        }
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// True when the rectangle has positive area and lies inside `0..size`.
    pub fn fits_within(&self, size: Size) -> bool {
        self.width > 0
            && self.height > 0
            && self.x >= 0
            && self.y >= 0
            && self.right() <= size.width as i64
            && self.bottom() <= size.height as i64
    }
}

impl Rect<FrameSpace> {
    /// Whole-frame rectangle.
    pub fn full(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    /// Copies the region out of `frame`.
    pub fn crop(&self, frame: &Frame) -> QualityResult<Frame> {
        let size = Size::new(frame.width(), frame.height());
        if !self.fits_within(size) {
            return Err(QualityError::InvalidRegion(format!(
                "{:?} does not fit a {}x{} frame",
                self, size.width, size.height
            )));
        }
        frame.sub_frame(
            self.x as u32,
            self.y as u32,
            self.width as u32,
            self.height as u32,
        )
    }
}

/// How a display rectangle reaching outside the viewport is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundsMode {
    /// Anything outside the viewport is rejected.
    #[default]
    Strict,
    /// Edges are clamped into the frame; only an empty result is rejected.
    Clamp,
}

/// Maps a display-space rectangle into the pixel grid of a frame using
/// independent per-axis scale factors (`frame / viewport`).
///
/// Edges are scaled multiply-first, so a rectangle covering the whole
/// viewport always maps to the whole frame.
pub fn map_to_frame(
    rect: &Rect<DisplaySpace>,
    viewport: Size,
    frame: Size,
    bounds: BoundsMode,
) -> QualityResult<Rect<FrameSpace>> {
    if viewport.is_empty() {
        return Err(QualityError::InvalidRegion(format!(
            "empty viewport {}x{}",
            viewport.width, viewport.height
        )));
    }
    if frame.is_empty() {
        return Err(QualityError::InvalidRegion(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }
    if rect.width <= 0 || rect.height <= 0 {
        return Err(QualityError::InvalidRegion(format!(
            "degenerate display rect {:?}",
            rect
        )));
    }
    if bounds == BoundsMode::Strict && !rect.fits_within(viewport) {
        return Err(QualityError::InvalidRegion(format!(
            "{:?} extends beyond the {}x{} viewport",
            rect, viewport.width, viewport.height
        )));
    }

    let scale = |v: i64, to: u32, from: u32| -> i64 { (v * to as i64).div_euclid(from as i64) };

    let left = scale(rect.x as i64, frame.width, viewport.width).max(0);
    let top = scale(rect.y as i64, frame.height, viewport.height).max(0);
    let right = scale(rect.right(), frame.width, viewport.width).min(frame.width as i64);
    let bottom = scale(rect.bottom(), frame.height, viewport.height).min(frame.height as i64);

    if right <= left || bottom <= top {
        return Err(QualityError::InvalidRegion(format!(
            "{:?} maps to an empty region of a {}x{} frame",
            rect, frame.width, frame.height
        )));
    }

    Ok(Rect::new(
        left as i32,
        top as i32,
        (right - left) as i32,
        (bottom - top) as i32,
    ))
}

/// The guide rectangle as laid out on screen, plus the viewport it was laid
/// out in. Enough to locate the ROI in any frame regardless of its size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiSpec {
    pub rect: Rect<DisplaySpace>,
    pub viewport: Size,
    #[serde(default)]
    pub bounds: BoundsMode,
}

impl RoiSpec {
    pub fn new(rect: Rect<DisplaySpace>, viewport: Size, bounds: BoundsMode) -> Self {
        Self {
            rect,
            viewport,
            bounds,
        }
    }

    /// Frame-space rectangle of the ROI in a frame of `frame` size.
    pub fn locate(&self, frame: Size) -> QualityResult<Rect<FrameSpace>> {
        map_to_frame(&self.rect, self.viewport, frame, self.bounds)
    }

    /// Maps the ROI into `frame` and crops it out.
    pub fn extract(&self, frame: &Frame) -> QualityResult<Frame> {
        self.locate(Size::new(frame.width(), frame.height()))?
            .crop(frame)
    }
}

/// Lays out the capture guide: a rectangle of the given aspect ratio,
/// centred in the viewport, spanning `fill` of its width (or of its height
/// when the width-based box would not fit).
pub fn guide_rect(viewport: Size, aspect_ratio: f64, fill: f64) -> QualityResult<Rect<DisplaySpace>> {
    if viewport.is_empty() {
        return Err(QualityError::InvalidRegion("empty viewport".to_string()));
    }
    if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) || !(fill > 0.0 && fill <= 1.0) {
        return Err(QualityError::InvalidRegion(format!(
            "bad guide parameters: aspect {} fill {}",
            aspect_ratio, fill
        )));
    }

    let max_w = viewport.width as f64 * fill;
    let max_h = viewport.height as f64 * fill;
    let (mut w, mut h) = (max_w, max_w / aspect_ratio);
    if h > max_h {
        h = max_h;
        w = h * aspect_ratio;
    }

    let w = (w.floor() as i32).max(1);
    let h = (h.floor() as i32).max(1);
    let x = (viewport.width as i32 - w) / 2;
    let y = (viewport.height as i32 - h) / 2;
    Ok(Rect::new(x, y, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport_maps_to_full_frame() {
        let sizes = [
            (Size::new(1080, 1920), Size::new(3024, 4032)),
            (Size::new(3, 7), Size::new(11, 5)),
            (Size::new(640, 480), Size::new(640, 480)),
            (Size::new(999, 333), Size::new(1, 1)),
        ];
        for (viewport, frame) in sizes {
            let rect = Rect::new(0, 0, viewport.width as i32, viewport.height as i32);
            let mapped = map_to_frame(&rect, viewport, frame, BoundsMode::Strict).unwrap();
            assert_eq!(mapped, Rect::full(frame));
        }
    }

    #[test]
    fn test_independent_axis_scaling() {
        let rect = Rect::new(100, 50, 200, 100);
        let mapped = map_to_frame(
            &rect,
            Size::new(400, 200),
            Size::new(800, 1000),
            BoundsMode::Strict,
        )
        .unwrap();
        assert_eq!(mapped, Rect::new(200, 250, 400, 500));
    }

    #[test]
    fn test_strict_rejects_out_of_viewport() {
        let rect = Rect::new(-10, 0, 50, 50);
        let err = map_to_frame(&rect, Size::new(100, 100), Size::new(200, 200), BoundsMode::Strict);
        assert!(matches!(err, Err(QualityError::InvalidRegion(_))));
    }

    #[test]
    fn test_clamp_trims_to_frame() {
        let rect = Rect::new(-10, 80, 50, 50);
        let mapped =
            map_to_frame(&rect, Size::new(100, 100), Size::new(200, 200), BoundsMode::Clamp).unwrap();
        assert_eq!(mapped, Rect::new(0, 160, 80, 40));
    }

    #[test]
    fn test_clamp_rejects_fully_outside() {
        let rect = Rect::new(150, 150, 20, 20);
        let err = map_to_frame(&rect, Size::new(100, 100), Size::new(200, 200), BoundsMode::Clamp);
        assert!(matches!(err, Err(QualityError::InvalidRegion(_))));
    }

    #[test]
    fn test_degenerate_inputs() {
        let rect = Rect::new(0, 0, 0, 10);
        assert!(map_to_frame(&rect, Size::new(10, 10), Size::new(10, 10), BoundsMode::Clamp).is_err());
        let rect = Rect::new(0, 0, 5, 5);
        assert!(map_to_frame(&rect, Size::new(0, 10), Size::new(10, 10), BoundsMode::Clamp).is_err());
        // One display pixel shrinks to nothing in a much smaller frame.
        let rect = Rect::new(1, 1, 1, 1);
        assert!(map_to_frame(&rect, Size::new(100, 100), Size::new(10, 10), BoundsMode::Strict).is_err());
    }

    #[test]
    fn test_crop_extracts_pixels() {
        let data: Vec<u8> = (0..16).collect();
        let frame = Frame::gray(4, 4, data, 0).unwrap();
        let cropped = Rect::<FrameSpace>::new(1, 2, 2, 2).crop(&frame).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.luma().as_raw(), &vec![9, 10, 13, 14]);
        assert!(Rect::<FrameSpace>::new(3, 3, 2, 1).crop(&frame).is_err());
    }

    #[test]
    fn test_roi_spec_follows_frame_size() {
        let roi = RoiSpec::new(Rect::new(10, 20, 30, 40), Size::new(100, 100), BoundsMode::Strict);
        assert_eq!(roi.locate(Size::new(200, 50)).unwrap(), Rect::new(20, 10, 60, 20));
        let frame = Frame::uniform(200, 50, 9, 0).unwrap();
        assert_eq!(roi.extract(&frame).unwrap().dimensions(), (60, 20));
    }

    #[test]
    fn test_guide_rect_is_centered_card() {
        let guide = guide_rect(Size::new(1000, 2000), ID_CARD_ASPECT_RATIO, 0.8).unwrap();
        assert_eq!(guide.width, 800);
        assert_eq!(guide.height, 503);
        assert_eq!(guide.x, 100);
        assert_eq!(guide.y, (2000 - 503) / 2);
        assert!(guide.fits_within(Size::new(1000, 2000)));
    }

    #[test]
    fn test_guide_rect_landscape_limited_by_height() {
        let guide = guide_rect(Size::new(2000, 500), ID_CARD_ASPECT_RATIO, 1.0).unwrap();
        assert_eq!(guide.height, 500);
        assert_eq!(guide.width, 795);
        assert!(guide_rect(Size::new(100, 100), 0.0, 0.5).is_err());
    }
}
