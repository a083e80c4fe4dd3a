//! RTSP frame source.
//!
//! `RtspSource` decodes frames from an IP camera with GStreamer, or produces
//! synthetic frames for `stub://` URLs. It is opened through `RtspConnector`,
//! which the stream loop uses both for the long-lived detection stream and
//! for the one-shot full-resolution snapshot stream.
//!
//! Stub URLs accept query parameters:
//! `stub://front?width=1280&height=720&frames=500`. With `frames` set the
//! stream ends after that many frames, which exercises the reconnect path.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use std::time::Duration;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Instant;
use url::Url;

use super::endpoint::redact;
use super::{FrameSource, SourceStats, StreamConnector};
use crate::frame::Frame;

/// How long a fresh connection may take to deliver its first frame. RTSP
/// setup and the first keyframe usually take a few seconds.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest stub frame side.
const MAX_STUB_SIDE: u32 = 8192;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/cam/realmonitor?channel=1&subtype=1")
    pub url: String,
    /// Expected frame rate, used to size read timeouts.
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 25,
            width: 640,
            height: 360,
        }
    }
}

/// Opens `RtspSource`s for the stream loop.
#[derive(Clone, Debug)]
pub struct RtspConnector {
    pub target_fps: u32,
}

impl Default for RtspConnector {
    fn default() -> Self {
        Self { target_fps: 25 }
    }
}

impl StreamConnector for RtspConnector {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>> {
        let mut source = RtspSource::new(RtspConfig {
            url: url.to_string(),
            target_fps: self.target_fps,
            ..RtspConfig::default()
        })?;
        source.connect()?;
        Ok(Box::new(source))
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)?),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "{} requires the rtsp-gstreamer feature",
                    redact(&config.url)
                )
            }
        }
    }

    /// Connect to the RTSP stream.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.is_healthy(),
        }
    }
}

impl FrameSource for RtspSource {
    fn describe(&self) -> String {
        match &self.backend {
            RtspBackend::Synthetic(source) => redact(&source.config.url),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => redact(&source.config.url),
        }
    }

    fn grab(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.grab(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.grab(),
        }
    }

    fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.read(),
        }
    }

    fn stats(&self) -> SourceStats {
        let healthy = self.is_healthy();
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(healthy),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(healthy),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and dry runs
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    frame_limit: Option<u64>,
    /// Frames delivered or discarded so far.
    position: u64,
    decoded: u64,
    grabbed: u64,
    connected: bool,
}

impl SyntheticRtspSource {
    fn new(mut config: RtspConfig) -> Result<Self> {
        let url = Url::parse(&config.url).map_err(|e| anyhow!("invalid stub url: {}", e))?;
        let mut frame_limit = None;
        for (key, value) in url.query_pairs() {
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub url parameter {}={} is not a number", key, value))?;
            match key.as_ref() {
                "width" => config.width = stub_side(&key, parsed)?,
                "height" => config.height = stub_side(&key, parsed)?,
                "frames" => frame_limit = Some(parsed),
                other => return Err(anyhow!("unknown stub url parameter '{}'", other)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frames must have non-zero dimensions"));
        }
        Ok(Self {
            config,
            frame_limit,
            position: 0,
            decoded: 0,
            grabbed: 0,
            connected: false,
        })
    }

    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("stub source not connected; call connect() first"));
        }
        if self.frame_limit.is_some_and(|limit| self.position >= limit) {
            return Err(anyhow!("stub stream ended after {} frames", self.position));
        }
        self.position += 1;
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        self.advance()?;
        self.grabbed += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        self.advance()?;
        self.decoded += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::from_rgb(pixels, self.config.width, self.config.height, self.position)
    }

    /// Diagonal gradient that drifts with the stream position.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width as u64;
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let p = i as u64 / 3;
            let (x, y) = (p % width, p / width);
            *pixel = ((x + y + self.position) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        self.connected && !self.frame_limit.is_some_and(|limit| self.position >= limit)
    }

    fn stats(&self, healthy: bool) -> SourceStats {
        SourceStats {
            frames_decoded: self.decoded,
            frames_grabbed: self.grabbed,
            healthy,
        }
    }
}

fn stub_side(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|side| *side <= MAX_STUB_SIDE)
        .ok_or_else(|| {
            anyhow!(
                "stub url parameter {}={} exceeds {} pixels",
                key,
                value,
                MAX_STUB_SIDE
            )
        })
}

/// Time to wait for the next frame. Until the first frame arrives the
/// connection is still negotiating, so the wait is [`FIRST_FRAME_TIMEOUT`];
/// afterwards it is four frame intervals, at least 500 ms.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn read_timeout(target_fps: u32, awaiting_first_frame: bool) -> Duration {
    if awaiting_first_frame {
        return FIRST_FRAME_TIMEOUT;
    }
    let base_ms = if target_fps == 0 {
        500
    } else {
        (1000 / target_fps).saturating_mul(4)
    };
    Duration::from_millis(u64::from(base_ms.max(500)))
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    decoded: u64,
    grabbed: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build the pipeline: rtspsrc ! decodebin ! videoconvert ! appsink (RGB).
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location=\"{}\" latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            decoded: 0,
            grabbed: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", redact(&self.config.url));
        Ok(())
    }

    /// Wait for the next sample, checking the bus between short slices so a
    /// pipeline error ends the wait early.
    fn pull(&mut self) -> Result<gstreamer::Sample> {
        let awaiting_first_frame = self.last_frame_at.is_none();
        let timeout = read_timeout(self.config.target_fps, awaiting_first_frame);
        let slice = read_timeout(self.config.target_fps, false);
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_bus();
            if let Some(err) = &self.last_error {
                return Err(anyhow!("{}", err));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(if awaiting_first_frame {
                    anyhow!("no first frame from RTSP stream within {:?}", timeout)
                } else {
                    anyhow!("RTSP stream stalled")
                });
            }
            let wait = remaining.min(slice);
            if let Some(sample) = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(wait.as_millis() as u64))
            {
                self.last_frame_at = Some(Instant::now());
                return Ok(sample);
            }
        }
    }

    /// Pull and drop a sample without copying pixels out.
    fn grab(&mut self) -> Result<()> {
        self.pull()?;
        self.grabbed += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let sample = self.pull()?;
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.decoded += 1;
        Frame::from_rgb(pixels, width, height, self.decoded + self.grabbed)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= FIRST_FRAME_TIMEOUT;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self, healthy: bool) -> SourceStats {
        SourceStats {
            frames_decoded: self.decoded,
            frames_grabbed: self.grabbed,
            healthy,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to release {}: {}", redact(&self.config.url), e);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame_bytes = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer shorter than frame")?;
        return Ok((frame_bytes.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
