use std::borrow::Cow;

use image::{imageops, DynamicImage, GrayImage, RgbImage};

use crate::error::{QualityError, QualityResult};

/// Decoded pixel samples of a frame.
#[derive(Debug, Clone)]
pub enum FramePixels {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// An immutable snapshot of one decoded camera image.
///
/// Construction rejects zero-area buffers, so every `Frame` handed to the
/// metric functions has at least one pixel. The pixel buffers are owned and
/// released when the frame is dropped.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: FramePixels,
    timestamp_ms: u64,
}

impl Frame {
    /// Builds a grayscale frame from row-major 8-bit samples.
    pub fn gray(width: u32, height: u32, data: Vec<u8>, timestamp_ms: u64) -> QualityResult<Self> {
        ensure_area(width, height)?;
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(QualityError::InvalidFrame(format!(
                "expected {} gray samples for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        let img = GrayImage::from_raw(width, height, data)
            .ok_or_else(|| QualityError::InvalidFrame("gray buffer rejected".to_string()))?;
        Ok(Self {
            pixels: FramePixels::Gray(img),
            timestamp_ms,
        })
    }

    /// Builds an RGB frame from row-major interleaved 8-bit samples.
    pub fn rgb(width: u32, height: u32, data: Vec<u8>, timestamp_ms: u64) -> QualityResult<Self> {
        ensure_area(width, height)?;
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(QualityError::InvalidFrame(format!(
                "expected {} rgb samples for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        let img = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| QualityError::InvalidFrame("rgb buffer rejected".to_string()))?;
        Ok(Self {
            pixels: FramePixels::Rgb(img),
            timestamp_ms,
        })
    }

    /// Builds a uniform grayscale frame. Handy for calibration and tests.
    pub fn uniform(width: u32, height: u32, value: u8, timestamp_ms: u64) -> QualityResult<Self> {
        Self::gray(
            width,
            height,
            vec![value; width as usize * height as usize],
            timestamp_ms,
        )
    }

    /// Wraps a decoded image. Single-channel images stay grayscale, anything
    /// else is converted to 8-bit RGB.
    pub fn from_image(img: DynamicImage, timestamp_ms: u64) -> QualityResult<Self> {
        ensure_area(img.width(), img.height())?;
        let pixels = match img {
            DynamicImage::ImageLuma8(gray) => FramePixels::Gray(gray),
            DynamicImage::ImageRgb8(rgb) => FramePixels::Rgb(rgb),
            other if other.color().channel_count() <= 2 => FramePixels::Gray(other.to_luma8()),
            other => FramePixels::Rgb(other.to_rgb8()),
        };
        Ok(Self {
            pixels,
            timestamp_ms,
        })
    }

    pub fn width(&self) -> u32 {
        match &self.pixels {
            FramePixels::Gray(img) => img.width(),
            FramePixels::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            FramePixels::Gray(img) => img.height(),
            FramePixels::Rgb(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn pixels(&self) -> &FramePixels {
        &self.pixels
    }

    pub fn is_grayscale(&self) -> bool {
        matches!(self.pixels, FramePixels::Gray(_))
    }

    /// Grayscale view of the frame. Borrowed for gray frames, converted with
    /// the `image` crate luma transform for RGB frames.
    pub fn luma(&self) -> Cow<'_, GrayImage> {
        match &self.pixels {
            FramePixels::Gray(img) => Cow::Borrowed(img),
            FramePixels::Rgb(img) => Cow::Owned(imageops::grayscale(img)),
        }
    }

    /// Copies out a sub-rectangle in pixel coordinates. The caller guarantees
    /// the rectangle lies inside the frame.
    pub(crate) fn sub_frame(&self, x: u32, y: u32, width: u32, height: u32) -> QualityResult<Self> {
        ensure_area(width, height)?;
        let pixels = match &self.pixels {
            FramePixels::Gray(img) => {
                FramePixels::Gray(image::imageops::crop_imm(img, x, y, width, height).to_image())
            }
            FramePixels::Rgb(img) => {
                FramePixels::Rgb(image::imageops::crop_imm(img, x, y, width, height).to_image())
            }
        };
        Ok(Self {
            pixels,
            timestamp_ms: self.timestamp_ms,
        })
    }
}

fn ensure_area(width: u32, height: u32) -> QualityResult<()> {
    if width == 0 || height == 0 {
        return Err(QualityError::InvalidFrame(format!(
            "zero-area frame {}x{}",
            width, height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_area() {
        assert!(matches!(
            Frame::gray(0, 10, Vec::new(), 0),
            Err(QualityError::InvalidFrame(_))
        ));
        assert!(matches!(
            Frame::from_image(DynamicImage::new_rgb8(4, 0), 0),
            Err(QualityError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_short_buffer() {
        assert!(Frame::rgb(2, 2, vec![0; 11], 0).is_err());
        assert!(Frame::rgb(2, 2, vec![0; 12], 0).is_ok());
    }

    #[test]
    fn test_luma_of_gray_rgb_matches_value() {
        let frame = Frame::rgb(2, 1, vec![90, 90, 90, 200, 200, 200], 5).unwrap();
        let gray = frame.luma();
        assert_eq!(gray.get_pixel(0, 0)[0], 90);
        assert_eq!(gray.get_pixel(1, 0)[0], 200);
        assert_eq!(frame.timestamp_ms(), 5);
    }

    #[test]
    fn test_luma_of_color_rgb_matches_decoder_conversion() {
        let data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 30, 140, 220];
        let frame = Frame::rgb(2, 2, data.clone(), 0).unwrap();
        let expected = DynamicImage::ImageRgb8(RgbImage::from_raw(2, 2, data).unwrap()).to_luma8();
        assert_eq!(*frame.luma(), expected);
        assert!(!frame.is_grayscale());
    }

    #[test]
    fn test_from_image_keeps_grayscale() {
        let frame = Frame::from_image(DynamicImage::new_luma8(3, 4), 0).unwrap();
        assert!(frame.is_grayscale());
        assert_eq!(frame.dimensions(), (3, 4));
    }
}
