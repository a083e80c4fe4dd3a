use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{Detection, DetectionRequest};
use crate::geometry::PixelRect;

/// Object detector backend.
///
/// Implementations take one RGB image and return raw detections in that
/// image's pixel space. They must honour the class filter and confidence
/// floor in `request`; stricter acceptance happens in `DetectionFilter`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one image.
    fn detect(&mut self, image: &RgbImage, request: &DetectionRequest) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Secondary detector that looks for a focal region (a face) inside a
/// subject crop.
///
/// Returned rectangles are in the pixel space of `image`. No confidence is
/// required; the refiner picks the largest one.
pub trait FocalRegionDetector: Send {
    fn name(&self) -> &'static str;

    fn locate(&mut self, image: &RgbImage) -> Result<Vec<PixelRect>>;
}

/// Focal detector that never finds anything. Snapshots fall back to the
/// padded subject crop.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFocalRegion;

impl FocalRegionDetector for NoFocalRegion {
    fn name(&self) -> &'static str {
        "none"
    }

    fn locate(&mut self, _image: &RgbImage) -> Result<Vec<PixelRect>> {
        Ok(Vec::new())
    }
}
