//! Frame geometry: boxes, pixel rectangles and resolution remapping.
//!
//! Three frame spaces are in play for one camera:
//! - the detection frame (the possibly downscaled image handed to the model),
//! - the native low-resolution stream frame,
//! - the native full-resolution stream frame used for snapshots.
//!
//! All three show the same optical scene and differ only by scale, so a box is
//! moved between them with independent x/y scale factors.

/// Pixel dimensions of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned box `(x1, y1, x2, y2)` in the pixel space of some frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area, zero for inverted boxes.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Move this box from frame `from` into frame `to`.
    ///
    /// Degenerate source dimensions are guarded with a minimum divisor of 1.
    pub fn remap(&self, from: FrameSize, to: FrameSize) -> Self {
        let sx = to.width as f32 / from.width.max(1) as f32;
        let sy = to.height as f32 / from.height.max(1) as f32;
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Integer rectangle for this box clipped to `frame`, or `None` when the
    /// clipped box has no area.
    pub fn clip_to(&self, frame: FrameSize) -> Option<PixelRect> {
        let (x1, y1, x2, y2) = self.truncated();
        PixelRect::from_corners(x1, y1, x2, y2, frame)
    }

    /// Expand each side by `padding` times the matching dimension, then clip.
    ///
    /// Coordinates and margins are truncated toward zero before clipping.
    pub fn padded_rect(&self, padding: f32, frame: FrameSize) -> Option<PixelRect> {
        let (x1, y1, x2, y2) = self.truncated();
        let margin_x = ((x2 - x1) as f32 * padding) as i64;
        let margin_y = ((y2 - y1) as f32 * padding) as i64;
        PixelRect::from_corners(
            x1 - margin_x,
            y1 - margin_y,
            x2 + margin_x,
            y2 + margin_y,
            frame,
        )
    }

    fn truncated(&self) -> (i64, i64, i64, i64) {
        (
            self.x1 as i64,
            self.y1 as i64,
            self.x2 as i64,
            self.y2 as i64,
        )
    }
}

impl From<PixelRect> for BoundingBox {
    fn from(rect: PixelRect) -> Self {
        Self {
            x1: rect.x as f32,
            y1: rect.y as f32,
            x2: (rect.x + rect.width) as f32,
            y2: (rect.y + rect.height) as f32,
        }
    }
}

/// Non-empty integer rectangle inside a frame, ready for cropping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering all of `frame`, `None` for an empty frame.
    pub fn full(frame: FrameSize) -> Option<Self> {
        if frame.is_empty() {
            None
        } else {
            Some(Self::new(0, 0, frame.width, frame.height))
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Shift a rectangle expressed in a sub-image by that sub-image's origin.
    pub fn offset(&self, origin_x: u32, origin_y: u32) -> Self {
        Self {
            x: self.x.saturating_add(origin_x),
            y: self.y.saturating_add(origin_y),
            ..*self
        }
    }

    fn from_corners(x1: i64, y1: i64, x2: i64, y2: i64, frame: FrameSize) -> Option<Self> {
        let x1 = x1.clamp(0, frame.width as i64);
        let y1 = y1.clamp(0, frame.height as i64);
        let x2 = x2.clamp(0, frame.width as i64);
        let y2 = y2.clamp(0, frame.height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// Frame sizes of the three spaces a subject box travels through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameResolutionContext {
    pub detection: FrameSize,
    pub low_res: FrameSize,
    pub full_res: FrameSize,
}

impl FrameResolutionContext {
    pub fn detection_to_low_res(&self, bbox: &BoundingBox) -> BoundingBox {
        bbox.remap(self.detection, self.low_res)
    }

    pub fn low_res_to_full_res(&self, bbox: &BoundingBox) -> BoundingBox {
        bbox.remap(self.low_res, self.full_res)
    }

    pub fn detection_to_full_res(&self, bbox: &BoundingBox) -> BoundingBox {
        self.low_res_to_full_res(&self.detection_to_low_res(bbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &BoundingBox, b: &BoundingBox) {
        for (l, r) in [(a.x1, b.x1), (a.y1, b.y1), (a.x2, b.x2), (a.y2, b.y2)] {
            assert!((l - r).abs() < 1e-3, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn remap_doubles_box_into_native_low_res() {
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 300.0);
        let mapped = bbox.remap(FrameSize::new(640, 360), FrameSize::new(1280, 720));
        assert_eq!(mapped, BoundingBox::new(200.0, 200.0, 400.0, 600.0));
    }

    #[test]
    fn remap_identity_keeps_box() {
        let bbox = BoundingBox::new(12.5, 7.0, 99.25, 143.0);
        let size = FrameSize::new(704, 576);
        assert_eq!(bbox.remap(size, size), bbox);
    }

    #[test]
    fn remap_chain_matches_direct_mapping() {
        let bbox = BoundingBox::new(33.0, 41.0, 187.0, 301.0);
        let a = FrameSize::new(640, 360);
        let b = FrameSize::new(704, 576);
        let c = FrameSize::new(2560, 1440);
        assert_close(&bbox.remap(a, b).remap(b, c), &bbox.remap(a, c));
    }

    #[test]
    fn remap_guards_zero_source_dimension() {
        let bbox = BoundingBox::new(1.0, 1.0, 2.0, 2.0);
        let mapped = bbox.remap(FrameSize::new(0, 0), FrameSize::new(10, 20));
        assert_eq!(mapped, BoundingBox::new(10.0, 20.0, 20.0, 40.0));
    }

    #[test]
    fn context_chains_detection_to_full_res() {
        let ctx = FrameResolutionContext {
            detection: FrameSize::new(640, 360),
            low_res: FrameSize::new(1280, 720),
            full_res: FrameSize::new(2560, 1440),
        };
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 300.0);
        assert_close(
            &ctx.detection_to_full_res(&bbox),
            &BoundingBox::new(400.0, 400.0, 800.0, 1200.0),
        );
    }

    #[test]
    fn padded_rect_expands_and_clips() {
        let frame = FrameSize::new(200, 200);
        let bbox = BoundingBox::new(10.0, 20.0, 110.0, 120.0);
        assert_eq!(
            bbox.padded_rect(0.15, frame),
            Some(PixelRect::new(0, 5, 125, 130))
        );
    }

    #[test]
    fn degenerate_boxes_have_no_rect() {
        let frame = FrameSize::new(100, 100);
        assert_eq!(BoundingBox::new(50.0, 50.0, 50.0, 80.0).clip_to(frame), None);
        assert_eq!(
            BoundingBox::new(150.0, 150.0, 180.0, 190.0).padded_rect(0.1, frame),
            None
        );
        assert_eq!(PixelRect::full(FrameSize::new(0, 10)), None);
    }
}
