//! Decoded frames and the detection-frame downscale.
//!
//! - `Frame`: one decoded RGB frame plus its capture instant and sequence number.
//! - `Frame::detection_image()`: the (possibly downscaled) image the model sees.
//!
//! Frames are ephemeral: the stream loop holds at most the current one.

use std::borrow::Cow;
use std::time::Instant;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::geometry::FrameSize;

/// One decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Position of this frame in its source (1-based, counts decoded frames only).
    pub sequence: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width(), self.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Image for the detector: bilinear downscale so the width does not
    /// exceed `max_width`. Narrower frames are borrowed unchanged.
    pub fn detection_image(&self, max_width: u32) -> Cow<'_, RgbImage> {
        let (width, height) = self.image.dimensions();
        if max_width == 0 || width <= max_width {
            return Cow::Borrowed(&self.image);
        }
        let scale = max_width as f32 / width as f32;
        let new_height = ((height as f32 * scale) as u32).max(1);
        Cow::Owned(imageops::resize(
            &self.image,
            max_width,
            new_height,
            FilterType::Triangle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, image::Rgb([40, 80, 120])), 1)
    }

    #[test]
    fn wide_frames_are_downscaled_for_detection() {
        let frame = solid(1280, 720);
        let det = frame.detection_image(640);
        assert_eq!(det.dimensions(), (640, 360));
        assert!(matches!(det, Cow::Owned(_)));
    }

    #[test]
    fn narrow_frames_pass_through() {
        let frame = solid(352, 288);
        let det = frame.detection_image(640);
        assert_eq!(det.dimensions(), (352, 288));
        assert!(matches!(det, Cow::Borrowed(_)));
    }

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 1).is_ok());
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 1).is_err());
    }
}
