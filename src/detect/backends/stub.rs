use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, FocalRegionDetector};
use crate::detect::result::{Detection, DetectionRequest};
use crate::geometry::PixelRect;

/// Stub backend for testing and `stub://` dry runs.
///
/// Replays a script of per-call outputs. Each entry is either a list of
/// detections or an inference failure. When the script runs out the backend
/// reports nothing. Detections are filtered through the request like a real
/// model would.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Result<Vec<Detection>, String>>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Vec<Detection>>,
    {
        Self {
            script: script.into_iter().map(Ok).collect(),
            calls: 0,
        }
    }

    /// Queue one call's output.
    pub fn push(&mut self, detections: Vec<Detection>) {
        self.script.push_back(Ok(detections));
    }

    /// Queue one failing call.
    pub fn push_failure(&mut self, reason: &str) {
        self.script.push_back(Err(reason.to_string()));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage, request: &DetectionRequest) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections
                .into_iter()
                .filter(|d| request.wants(d.class_id) && d.confidence >= request.confidence_floor)
                .collect()),
            Some(Err(reason)) => Err(anyhow!("stub inference failed: {}", reason)),
            None => Ok(Vec::new()),
        }
    }
}

/// Focal detector returning a fixed set of rectangles for every query.
#[derive(Clone, Debug, Default)]
pub struct FixedFocalRegions {
    regions: Vec<PixelRect>,
}

impl FixedFocalRegions {
    pub fn new(regions: Vec<PixelRect>) -> Self {
        Self { regions }
    }
}

impl FocalRegionDetector for FixedFocalRegions {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn locate(&mut self, image: &RgbImage) -> Result<Vec<PixelRect>> {
        // Drop regions that would not fit the queried crop.
        Ok(self
            .regions
            .iter()
            .copied()
            .filter(|r| r.x + r.width <= image.width() && r.y + r.height <= image.height())
            .collect())
    }
}
