#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, FocalRegionDetector};
use crate::detect::result::{Detection, DetectionRequest};
use crate::geometry::{BoundingBox, FrameSize, PixelRect};

type Plan = TypedRunnableModel<TypedModel>;

const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 100;

fn load_plan(model_path: &Path, width: u32, height: u32) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn chw_tensor(image: &RgbImage, normalize: impl Fn(u8) -> f32) -> Tensor {
    let (width, height) = image.dimensions();
    tract_ndarray::Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, channel, y, x)| normalize(image.get_pixel(x as u32, y as u32)[channel]),
    )
    .into_tensor()
}

// ----------------------------------------------------------------------------
// YOLOv8 person detector
// ----------------------------------------------------------------------------

/// Tract-based YOLOv8 backend.
///
/// Expects an Ultralytics export with a `[1, 4 + classes, anchors]` output of
/// `cx, cy, w, h` followed by per-class scores, in letterboxed input pixels.
pub struct TractBackend {
    model: Plan,
    input_size: u32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractBackend {
    /// Load a square-input YOLOv8 ONNX model from disk.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model = load_plan(model_path.as_ref(), input_size, input_size)?;
        Ok(Self {
            model,
            input_size,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        })
    }

    fn letterbox(&self, image: &RgbImage) -> (RgbImage, Letterbox) {
        let (width, height) = image.dimensions();
        let side = self.input_size;
        let scale = (side as f32 / width.max(1) as f32).min(side as f32 / height.max(1) as f32);
        let scaled_w = ((width as f32 * scale) as u32).clamp(1, side);
        let scaled_h = ((height as f32 * scale) as u32).clamp(1, side);
        let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(side, side, LETTERBOX_FILL);
        let pad_x = (side - scaled_w) / 2;
        let pad_y = (side - scaled_h) / 2;
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
        (
            canvas,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
                source: FrameSize::new(width, height),
            },
        )
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        request: &DetectionRequest,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;
        let (_, rows, anchors) = view.dim();
        if rows <= 4 {
            return Err(anyhow!("model output has no class scores ({} rows)", rows));
        }

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_score = 0f32;
            let mut best_class = 0usize;
            for c in 0..rows - 4 {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            let class_id = best_class as u32;
            if best_score < request.confidence_floor || !request.wants(class_id) {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            let bbox = letterbox.unmap(BoundingBox::new(
                cx - w / 2.0,
                cy - h / 2.0,
                cx + w / 2.0,
                cy + h / 2.0,
            ));
            candidates.push(Detection::new(class_id, best_score, bbox));
        }

        Ok(non_max_suppression(
            candidates,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, request: &DetectionRequest) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.letterbox(image);
        let tensor = chw_tensor(&input, |v| v as f32 / 255.0);
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, request)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::from_pixel(self.input_size, self.input_size, LETTERBOX_FILL);
        self.detect(&blank, &DetectionRequest::default()).map(|_| ())
    }
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    source: FrameSize,
}

impl Letterbox {
    fn unmap(&self, bbox: BoundingBox) -> BoundingBox {
        let scale = self.scale.max(f32::EPSILON);
        let max_x = self.source.width as f32;
        let max_y = self.source.height as f32;
        BoundingBox::new(
            ((bbox.x1 - self.pad_x) / scale).clamp(0.0, max_x),
            ((bbox.y1 - self.pad_y) / scale).clamp(0.0, max_y),
            ((bbox.x2 - self.pad_x) / scale).clamp(0.0, max_x),
            ((bbox.y2 - self.pad_y) / scale).clamp(0.0, max_y),
        )
    }
}

/// Greedy per-class non-maximum suppression.
fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let inter_area = inter.area();
    let union = a.area() + b.area() - inter_area;
    if union <= 0.0 {
        0.0
    } else {
        inter_area / union
    }
}

// ----------------------------------------------------------------------------
// UltraFace focal-region detector
// ----------------------------------------------------------------------------

/// Tract-based face locator for UltraFace (RFB-320 / slim) exports.
///
/// Outputs are `scores [1, N, 2]` and `boxes [1, N, 4]` with corners
/// normalised to 0..1.
pub struct TractFaceBackend {
    model: Plan,
    input: FrameSize,
    score_threshold: f32,
}

impl TractFaceBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let input = FrameSize::new(320, 240);
        let model = load_plan(model_path.as_ref(), input.width, input.height)?;
        Ok(Self {
            model,
            input,
            score_threshold: 0.7,
        })
    }
}

impl FocalRegionDetector for TractFaceBackend {
    fn name(&self) -> &'static str {
        "tract-face"
    }

    fn locate(&mut self, image: &RgbImage) -> Result<Vec<PixelRect>> {
        let frame = FrameSize::new(image.width(), image.height());
        let resized = imageops::resize(image, self.input.width, self.input.height, FilterType::Triangle);
        let tensor = chw_tensor(&resized, |v| (v as f32 - 127.0) / 128.0);
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("face inference failed")?;
        if outputs.len() < 2 {
            return Err(anyhow!("face model produced {} outputs, expected 2", outputs.len()));
        }
        let scores = outputs[0]
            .to_array_view::<f32>()
            .context("face scores were not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected [1, N, 2] face scores")?;
        let boxes = outputs[1]
            .to_array_view::<f32>()
            .context("face boxes were not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected [1, N, 4] face boxes")?;

        let mut candidates = Vec::new();
        for i in 0..scores.dim().1.min(boxes.dim().1) {
            let score = scores[[0, i, 1]];
            if score < self.score_threshold {
                continue;
            }
            let bbox = BoundingBox::new(
                boxes[[0, i, 0]] * frame.width as f32,
                boxes[[0, i, 1]] * frame.height as f32,
                boxes[[0, i, 2]] * frame.width as f32,
                boxes[[0, i, 3]] * frame.height as f32,
            );
            candidates.push(Detection::new(0, score, bbox));
        }

        Ok(non_max_suppression(candidates, 0.3, 16)
            .into_iter()
            .filter_map(|d| d.bbox.clip_to(frame))
            .collect())
    }
}
