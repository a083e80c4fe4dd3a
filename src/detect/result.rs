use crate::geometry::BoundingBox;

/// COCO class id of `person`, the subject class of this daemon.
pub const PERSON_CLASS_ID: u32 = 0;

/// One raw model output, in the pixel space of the image it was produced from.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    /// Model confidence in (0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Parameters passed to the model at call time.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRequest {
    /// Classes the model should report. Empty means all classes.
    pub class_ids: Vec<u32>,
    /// Loose confidence floor applied by the model itself.
    pub confidence_floor: f32,
}

impl DetectionRequest {
    pub fn wants(&self, class_id: u32) -> bool {
        self.class_ids.is_empty() || self.class_ids.contains(&class_id)
    }
}

impl Default for DetectionRequest {
    fn default() -> Self {
        Self {
            class_ids: vec![PERSON_CLASS_ID],
            confidence_floor: 0.5,
        }
    }
}
