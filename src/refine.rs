//! Snapshot region refinement.
//!
//! A tight face crop is easier to verify than a full-body box, but the face
//! locator often finds nothing. Refinement is an ordered list of attempts,
//! each falling back to the next:
//!
//! 1. padded crop of the largest focal region found inside the subject box,
//! 2. padded crop of the subject box,
//! 3. the whole frame.
//!
//! The result is tagged with the attempt that produced it and is never empty
//! for a non-empty frame.

use anyhow::{anyhow, Result};
use image::imageops;
use image::RgbImage;

use crate::detect::FocalRegionDetector;
use crate::geometry::{BoundingBox, FrameSize, PixelRect};

/// Which attempt produced the crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineOutcome {
    FocalRegion,
    Subject,
    WholeFrame,
}

#[derive(Debug)]
pub struct Refined {
    pub image: RgbImage,
    /// Crop rectangle in source-frame coordinates.
    pub rect: PixelRect,
    pub outcome: RefineOutcome,
}

pub struct RegionRefiner {
    focal: Box<dyn FocalRegionDetector>,
    padding: f32,
}

impl RegionRefiner {
    pub fn new(focal: Box<dyn FocalRegionDetector>, padding: f32) -> Self {
        Self { focal, padding }
    }

    pub fn padding(&self) -> f32 {
        self.padding
    }

    /// Crop `frame` around `subject`, preferring a focal region inside it.
    ///
    /// Fails only for an empty frame.
    pub fn refine(&mut self, frame: &RgbImage, subject: &BoundingBox) -> Result<Refined> {
        let size = FrameSize::new(frame.width(), frame.height());
        let Some(whole) = PixelRect::full(size) else {
            return Err(anyhow!("cannot refine an empty {}x{} frame", size.width, size.height));
        };

        let focal = subject
            .clip_to(size)
            .and_then(|roi| self.locate_focal(frame, roi))
            .and_then(|region| BoundingBox::from(region).padded_rect(self.padding, size));

        let (rect, outcome) = match focal {
            Some(rect) => (rect, RefineOutcome::FocalRegion),
            None => match subject.padded_rect(self.padding, size) {
                Some(rect) => (rect, RefineOutcome::Subject),
                None => (whole, RefineOutcome::WholeFrame),
            },
        };

        let image = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
        Ok(Refined {
            image,
            rect,
            outcome,
        })
    }

    /// Largest focal region inside `roi`, in frame coordinates.
    fn locate_focal(&mut self, frame: &RgbImage, roi: PixelRect) -> Option<PixelRect> {
        let sub_image = imageops::crop_imm(frame, roi.x, roi.y, roi.width, roi.height).to_image();
        let candidates = match self.focal.locate(&sub_image) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("focal detector {} failed: {:#}", self.focal.name(), e);
                return None;
            }
        };
        candidates
            .into_iter()
            .filter(|c| c.area() > 0)
            .max_by_key(|c| c.area())
            .map(|c| c.offset(roi.x, roi.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{FixedFocalRegions, NoFocalRegion};

    struct FailingFocal;

    impl FocalRegionDetector for FailingFocal {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn locate(&mut self, _image: &RgbImage) -> Result<Vec<PixelRect>> {
            Err(anyhow!("cascade not loaded"))
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(400, 300, image::Rgb([10, 20, 30]))
    }

    #[test]
    fn no_candidates_falls_back_to_padded_subject() -> Result<()> {
        let mut refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.10);
        let refined = refiner.refine(&frame(), &BoundingBox::new(100.0, 50.0, 200.0, 250.0))?;
        assert_eq!(refined.outcome, RefineOutcome::Subject);
        assert_eq!(refined.rect, PixelRect::new(90, 30, 120, 240));
        assert_eq!(refined.image.dimensions(), (120, 240));
        Ok(())
    }

    #[test]
    fn largest_focal_region_is_translated_and_padded() -> Result<()> {
        let focal = FixedFocalRegions::new(vec![
            PixelRect::new(5, 5, 10, 10),
            PixelRect::new(30, 20, 40, 40),
        ]);
        let mut refiner = RegionRefiner::new(Box::new(focal), 0.10);
        let refined = refiner.refine(&frame(), &BoundingBox::new(100.0, 50.0, 200.0, 250.0))?;
        assert_eq!(refined.outcome, RefineOutcome::FocalRegion);
        // Face at (130, 70)-(170, 110) in frame space, 4px margin each side.
        assert_eq!(refined.rect, PixelRect::new(126, 66, 48, 48));
        Ok(())
    }

    #[test]
    fn focal_detector_errors_degrade_to_subject() -> Result<()> {
        let mut refiner = RegionRefiner::new(Box::new(FailingFocal), 0.15);
        let refined = refiner.refine(&frame(), &BoundingBox::new(10.0, 10.0, 60.0, 110.0))?;
        assert_eq!(refined.outcome, RefineOutcome::Subject);
        Ok(())
    }

    #[test]
    fn box_outside_frame_falls_back_to_whole_frame() -> Result<()> {
        let mut refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.15);
        let refined = refiner.refine(&frame(), &BoundingBox::new(900.0, 900.0, 950.0, 990.0))?;
        assert_eq!(refined.outcome, RefineOutcome::WholeFrame);
        assert_eq!(refined.image.dimensions(), (400, 300));
        Ok(())
    }

    #[test]
    fn partially_outside_box_is_clipped() -> Result<()> {
        let mut refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.20);
        let refined = refiner.refine(&frame(), &BoundingBox::new(-50.0, 200.0, 80.0, 400.0))?;
        assert_eq!(refined.outcome, RefineOutcome::Subject);
        assert!(refined.rect.x + refined.rect.width <= 400);
        assert!(refined.rect.y + refined.rect.height <= 300);
        assert!(refined.rect.area() > 0);
        Ok(())
    }

    #[test]
    fn never_empty_for_assorted_subjects() -> Result<()> {
        let mut refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.15);
        let image = frame();
        for bbox in [
            BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            BoundingBox::new(399.0, 299.0, 400.0, 300.0),
            BoundingBox::new(200.0, 100.0, 150.0, 50.0),
            BoundingBox::new(-10.0, -10.0, 500.0, 500.0),
        ] {
            let refined = refiner.refine(&image, &bbox)?;
            assert!(refined.image.width() > 0 && refined.image.height() > 0);
        }
        Ok(())
    }

    #[test]
    fn empty_frame_is_an_error() {
        let mut refiner = RegionRefiner::new(Box::new(NoFocalRegion), 0.15);
        let empty = RgbImage::new(0, 0);
        assert!(refiner
            .refine(&empty, &BoundingBox::new(0.0, 0.0, 10.0, 10.0))
            .is_err());
    }
}
