use crate::detect::result::{Detection, PERSON_CLASS_ID};

/// Acceptance thresholds for subject detections.
///
/// Box sizes are measured in the detection frame. Confidence alone lets
/// reflections and partial bodies through; small boxes are rejected even
/// when the model is sure of them.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionFilter {
    pub target_class: u32,
    pub min_confidence: f32,
    pub min_width: f32,
    pub min_height: f32,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            target_class: PERSON_CLASS_ID,
            min_confidence: 0.85,
            min_width: 25.0,
            min_height: 50.0,
        }
    }
}

impl DetectionFilter {
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.class_id == self.target_class
            && detection.confidence >= self.min_confidence
            && detection.bbox.width() >= self.min_width
            && detection.bbox.height() >= self.min_height
    }

    /// Keep the accepted detections, in input order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }

    /// The highest-confidence detection, used as the snapshot subject.
    pub fn best(accepted: &[Detection]) -> Option<&Detection> {
        accepted
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}
