//! Arrival snapshots.
//!
//! On an arrival the capturer opens the full-resolution stream, reads a
//! single frame and closes it again, so no second connection is held while
//! nobody is arriving. If that fails, the low-resolution frame already in
//! hand is used instead. The subject box is remapped into whichever frame was
//! captured, refined to a tight crop and JPEG-encoded without resizing.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::frame::Frame;
use crate::geometry::{BoundingBox, FrameResolutionContext, FrameSize};
use crate::ingest::{redact, StreamConnector};
use crate::refine::{RefineOutcome, RegionRefiner};

/// Which frame a snapshot was cut from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotSource {
    FullResolution,
    LowResolutionFallback,
}

/// One arrival's snapshot work, built once and consumed synchronously.
#[derive(Debug)]
pub struct SnapshotJob {
    pub frame: RgbImage,
    /// Subject box in `frame` coordinates.
    pub subject: BoundingBox,
    pub camera: String,
    pub event_time: SystemTime,
    pub source: SnapshotSource,
}

/// Encoded snapshot ready for dispatch.
#[derive(Debug)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub size: FrameSize,
    pub source: SnapshotSource,
    pub refine: RefineOutcome,
    pub event_time: SystemTime,
}

pub struct SnapshotCapturer {
    connector: Arc<dyn StreamConnector>,
    full_res_url: String,
    refiner: RegionRefiner,
    jpeg_quality: u8,
}

impl SnapshotCapturer {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        full_res_url: impl Into<String>,
        refiner: RegionRefiner,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            connector,
            full_res_url: full_res_url.into(),
            refiner,
            jpeg_quality,
        }
    }

    /// Build the job for one arrival.
    ///
    /// `detection` is the size of the image the model saw and `subject` is in
    /// that image's coordinates; `low_res` is the stream frame it came from.
    pub fn prepare(
        &self,
        camera: &str,
        low_res: &Frame,
        detection: FrameSize,
        subject: &BoundingBox,
    ) -> SnapshotJob {
        let event_time = SystemTime::now();
        let (frame, source) = match self.grab_full_resolution() {
            Ok(frame) => (frame.into_image(), SnapshotSource::FullResolution),
            Err(e) => {
                log::warn!(
                    "[{}] snapshot: full-resolution capture failed, using detection frame: {:#}",
                    camera,
                    e
                );
                (
                    low_res.image().clone(),
                    SnapshotSource::LowResolutionFallback,
                )
            }
        };
        let ctx = FrameResolutionContext {
            detection,
            low_res: low_res.size(),
            full_res: FrameSize::new(frame.width(), frame.height()),
        };
        let subject = match source {
            SnapshotSource::FullResolution => ctx.detection_to_full_res(subject),
            SnapshotSource::LowResolutionFallback => ctx.detection_to_low_res(subject),
        };
        SnapshotJob {
            frame,
            subject,
            camera: camera.to_string(),
            event_time,
            source,
        }
    }

    /// Refine and encode a prepared job.
    pub fn render(&mut self, job: SnapshotJob) -> Result<Snapshot> {
        let refined = self
            .refiner
            .refine(&job.frame, &job.subject)
            .with_context(|| format!("[{}] snapshot: refine", job.camera))?;
        let size = FrameSize::new(refined.image.width(), refined.image.height());
        let jpeg = encode_jpeg(&refined.image, self.jpeg_quality)
            .with_context(|| format!("[{}] snapshot: encode", job.camera))?;
        Ok(Snapshot {
            jpeg,
            size,
            source: job.source,
            refine: refined.outcome,
            event_time: job.event_time,
        })
    }

    /// `prepare` then `render`.
    pub fn capture(
        &mut self,
        camera: &str,
        low_res: &Frame,
        detection: FrameSize,
        subject: &BoundingBox,
    ) -> Result<Snapshot> {
        let job = self.prepare(camera, low_res, detection, subject);
        self.render(job)
    }

    /// One frame from a fresh full-resolution connection, closed on return.
    fn grab_full_resolution(&self) -> Result<Frame> {
        let mut source = self
            .connector
            .open(&self.full_res_url)
            .with_context(|| format!("open {}", redact(&self.full_res_url)))?;
        let frame = source
            .read()
            .with_context(|| format!("read {}", source.describe()))?;
        drop(source);
        Ok(frame)
    }
}

/// JPEG-encode at `quality` (1..=100), no resizing.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(image)
        .context("JPEG encoding failed")?;
    Ok(jpeg)
}
